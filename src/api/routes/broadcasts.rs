//! Broadcast management routes.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/broadcasts` | Create a broadcast and start its fan-out |
//! | GET | `/api/broadcasts` | List broadcasts, newest first, paginated |
//! | GET | `/api/broadcasts/stats` | Aggregate delivery stats across all broadcasts |
//! | GET | `/api/broadcasts/{id}` | Get a single broadcast with live counters |
//! | POST | `/api/broadcasts/{id}/cancel` | Cancel a pending broadcast |
//! | POST | `/api/broadcasts/{id}/retry` | Re-run a failed broadcast as a new one |

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::domain::{BroadcastRecord, MessageContent, TargetSelector};

/// Create the broadcasts router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_broadcasts).post(create_broadcast))
        .route("/stats", get(get_stats))
        .route("/{id}", get(get_broadcast))
        .route("/{id}/cancel", post(cancel_broadcast))
        .route("/{id}/retry", post(retry_broadcast))
}

/// Request body for creating a broadcast.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBroadcastRequest {
    /// Message content to deliver.
    pub content: MessageContent,
    /// Audience selection policy.
    pub target_selector: TargetSelector,
}

/// Pagination parameters for the broadcast list.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastPaginationParams {
    /// Number of items to return (default: 20, max: 100).
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Number of items to skip.
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

impl Default for BroadcastPaginationParams {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// A broadcast as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastResponse {
    pub id: String,
    pub content: MessageContent,
    pub target_selector: TargetSelector,
    pub total_recipients: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub status: String,
    /// Sent fraction over counted outcomes so far, in `[0.0, 1.0]`.
    pub success_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
}

impl From<BroadcastRecord> for BroadcastResponse {
    fn from(record: BroadcastRecord) -> Self {
        let counted = record.sent_count + record.failed_count;
        let success_rate = if counted == 0 {
            0.0
        } else {
            record.sent_count as f64 / counted as f64
        };

        Self {
            id: record.id,
            content: record.content,
            target_selector: record.target_selector,
            total_recipients: record.total_recipients,
            sent_count: record.sent_count,
            failed_count: record.failed_count,
            status: record.status.to_string(),
            success_rate,
            retry_of: record.retry_of,
            created_at: record.created_at,
            finalized_at: record.finalized_at,
        }
    }
}

/// Response for the broadcast list with pagination.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastListResponse {
    /// Broadcasts, newest first.
    pub broadcasts: Vec<BroadcastResponse>,
    /// Total number of broadcasts.
    pub total: i64,
    /// Number of items returned.
    pub limit: u32,
    /// Number of items skipped.
    pub offset: u32,
}

/// Aggregate delivery stats across all broadcasts.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastStatsResponse {
    pub total_broadcasts: i64,
    pub total_sent: i64,
    pub total_failed: i64,
    /// Sent fraction over all counted outcomes, in `[0.0, 1.0]`.
    pub success_rate: f64,
}

/// Create a broadcast and start its fan-out.
///
/// # Endpoint
///
/// `POST /api/broadcasts`
///
/// The response carries the record after fan-out setup: recipients are
/// resolved and tasks enqueued, but delivery runs in the background, so
/// counters start at zero unless resolution found nobody.
async fn create_broadcast(
    State(state): State<AppState>,
    Json(payload): Json<CreateBroadcastRequest>,
) -> ApiResult<Json<BroadcastResponse>> {
    let coordinator = state
        .coordinator
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Broadcast service not available"))?;

    let record = coordinator
        .create_broadcast(payload.content, payload.target_selector)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(record.into()))
}

/// List broadcasts, newest first.
///
/// # Endpoint
///
/// `GET /api/broadcasts`
///
/// # Query Parameters
///
/// - `limit` - Number of items to return (default: 20, max: 100)
/// - `offset` - Number of items to skip (default: 0)
async fn list_broadcasts(
    State(state): State<AppState>,
    Query(pagination): Query<BroadcastPaginationParams>,
) -> ApiResult<Json<BroadcastListResponse>> {
    let coordinator = state
        .coordinator
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Broadcast service not available"))?;

    let effective_limit = pagination.limit.min(100);
    let (broadcasts, total) = coordinator
        .list_broadcasts(i64::from(effective_limit), i64::from(pagination.offset))
        .await
        .map_err(ApiError::from)?;

    Ok(Json(BroadcastListResponse {
        broadcasts: broadcasts.into_iter().map(Into::into).collect(),
        total,
        limit: effective_limit,
        offset: pagination.offset,
    }))
}

/// Aggregate delivery stats across all broadcasts.
///
/// # Endpoint
///
/// `GET /api/broadcasts/stats`
async fn get_stats(State(state): State<AppState>) -> ApiResult<Json<BroadcastStatsResponse>> {
    let coordinator = state
        .coordinator
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Broadcast service not available"))?;

    let stats = coordinator.stats().await.map_err(ApiError::from)?;

    Ok(Json(BroadcastStatsResponse {
        total_broadcasts: stats.total_broadcasts,
        total_sent: stats.total_sent,
        total_failed: stats.total_failed,
        success_rate: stats.success_rate(),
    }))
}

/// Get a broadcast by ID.
///
/// # Endpoint
///
/// `GET /api/broadcasts/{id}`
async fn get_broadcast(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BroadcastResponse>> {
    let coordinator = state
        .coordinator
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Broadcast service not available"))?;

    let record = coordinator.get_broadcast(&id).await.map_err(ApiError::from)?;
    Ok(Json(record.into()))
}

/// Cancel a pending broadcast.
///
/// # Endpoint
///
/// `POST /api/broadcasts/{id}/cancel`
///
/// Returns 409 if the broadcast already reached a terminal status.
async fn cancel_broadcast(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BroadcastResponse>> {
    let coordinator = state
        .coordinator
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Broadcast service not available"))?;

    let record = coordinator
        .cancel_broadcast(&id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(record.into()))
}

/// Re-run a failed broadcast as a fresh linked broadcast.
///
/// # Endpoint
///
/// `POST /api/broadcasts/{id}/retry`
///
/// Returns the new broadcast; 409 if the source is not FAILED.
async fn retry_broadcast(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BroadcastResponse>> {
    let retry_coordinator = state
        .retry_coordinator
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Retry service not available"))?;

    let record = retry_coordinator.retry(&id).await.map_err(ApiError::from)?;
    Ok(Json(record.into()))
}
