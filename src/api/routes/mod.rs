//! API route modules.
//!
//! Organizes routes by resource type.

pub mod broadcasts;
pub mod health;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/broadcasts", broadcasts::router())
        .nest("/api/health", health::router())
        .with_state(state)
}
