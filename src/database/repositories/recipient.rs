//! Recipient directory repository.
//!
//! Read-only lookup over the `recipient` table. Rows matching the selector
//! are returned as stored; policy filtering (inactive exclusion, dedup) is
//! the resolver's job.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::domain::{Recipient, TargetSelector};
use crate::Result;

/// Recipient directory trait.
#[async_trait]
pub trait RecipientRepository: Send + Sync {
    /// Fetch the recipients a selector matches.
    async fn list_by_policy(&self, selector: &TargetSelector) -> Result<Vec<Recipient>>;
}

#[derive(sqlx::FromRow)]
struct RecipientRow {
    id: String,
    address: String,
    is_active: i64,
}

impl From<RecipientRow> for Recipient {
    fn from(row: RecipientRow) -> Self {
        Recipient {
            id: row.id,
            address: row.address,
            is_active: row.is_active != 0,
        }
    }
}

/// SQLx implementation of RecipientRepository.
pub struct SqlxRecipientRepository {
    pool: SqlitePool,
}

impl SqlxRecipientRepository {
    /// Create a new SqlxRecipientRepository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientRepository for SqlxRecipientRepository {
    async fn list_by_policy(&self, selector: &TargetSelector) -> Result<Vec<Recipient>> {
        let rows: Vec<RecipientRow> = match selector {
            TargetSelector::All => {
                sqlx::query_as("SELECT id, address, is_active FROM recipient ORDER BY id")
                    .fetch_all(&self.pool)
                    .await?
            }
            TargetSelector::ActiveOnly => {
                sqlx::query_as(
                    "SELECT id, address, is_active FROM recipient WHERE is_active = 1 ORDER BY id",
                )
                .fetch_all(&self.pool)
                .await?
            }
            TargetSelector::RecentlyActive { within_days } => {
                let cutoff =
                    chrono::Utc::now() - chrono::Duration::days(i64::from(*within_days));

                sqlx::query_as(
                    r#"
                    SELECT id, address, is_active FROM recipient
                    WHERE last_seen_at IS NOT NULL
                      AND datetime(last_seen_at) >= datetime(?)
                    ORDER BY id
                    "#,
                )
                .bind(cutoff.to_rfc3339())
                .fetch_all(&self.pool)
                .await?
            }
            TargetSelector::ExplicitIds { ids } => {
                let ids_json = serde_json::to_string(ids)?;

                sqlx::query_as(
                    r#"
                    SELECT id, address, is_active FROM recipient
                    WHERE id IN (SELECT value FROM json_each(?))
                    ORDER BY id
                    "#,
                )
                .bind(ids_json)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(Recipient::from).collect())
    }
}
