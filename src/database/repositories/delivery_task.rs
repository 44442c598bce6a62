//! Delivery task repository.
//!
//! Tasks live in the `delivery_task` table and move QUEUED -> IN_FLIGHT ->
//! SENT/FAILED. The claim is an optimistic conditional update: whoever flips
//! the row out of QUEUED owns it.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{DeliveryTaskDbModel, NewDeliveryTask};
use crate::database::time::now_ms;
use crate::domain::TaskStatus;
use crate::Result;

/// How many times a single claim call re-selects after losing the
/// conditional update to another worker.
const CLAIM_RETRY_LIMIT: usize = 3;

/// Delivery task repository trait.
#[async_trait]
pub trait DeliveryTaskRepository: Send + Sync {
    /// Insert a new QUEUED task.
    async fn enqueue(&self, task: &NewDeliveryTask) -> Result<()>;

    /// Claim the oldest QUEUED task, moving it to IN_FLIGHT.
    ///
    /// Returns `None` when the queue is empty or every candidate was taken
    /// by a competing worker first.
    async fn claim_next(&self) -> Result<Option<DeliveryTaskDbModel>>;

    /// Requeue IN_FLIGHT tasks whose claim is older than the cutoff.
    ///
    /// Covers workers that died mid-delivery. Returns the number of tasks
    /// put back.
    async fn requeue_expired(&self, cutoff_ms: i64) -> Result<u64>;

    /// Delete terminal tasks finished before the cutoff.
    async fn prune_finished_before(&self, cutoff_ms: i64) -> Result<u64>;

    /// Number of QUEUED tasks.
    async fn count_queued(&self) -> Result<i64>;

    /// All tasks belonging to a broadcast, in enqueue order.
    async fn list_for_broadcast(&self, broadcast_id: &str) -> Result<Vec<DeliveryTaskDbModel>>;
}

/// SQLx implementation of DeliveryTaskRepository.
pub struct SqlxDeliveryTaskRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxDeliveryTaskRepository {
    /// Create a new SqlxDeliveryTaskRepository with the given connection pools.
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl DeliveryTaskRepository for SqlxDeliveryTaskRepository {
    async fn enqueue(&self, task: &NewDeliveryTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO delivery_task (
                broadcast_id, recipient_id, address, content, status, attempts, created_at
            ) VALUES (?, ?, ?, ?, 'QUEUED', 0, ?)
            "#,
        )
        .bind(&task.broadcast_id)
        .bind(&task.recipient_id)
        .bind(&task.address)
        .bind(&task.content)
        .bind(now_ms())
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn claim_next(&self) -> Result<Option<DeliveryTaskDbModel>> {
        for _ in 0..CLAIM_RETRY_LIMIT {
            let Some(candidate) = sqlx::query_as::<_, DeliveryTaskDbModel>(
                "SELECT * FROM delivery_task WHERE status = 'QUEUED' ORDER BY id LIMIT 1",
            )
            .fetch_optional(&self.pool)
            .await?
            else {
                return Ok(None);
            };

            let now = now_ms();
            let result = sqlx::query(
                r#"
                UPDATE delivery_task
                SET status = 'IN_FLIGHT', attempts = attempts + 1, claimed_at = ?
                WHERE id = ? AND status = 'QUEUED'
                "#,
            )
            .bind(now)
            .bind(candidate.id)
            .execute(&self.write_pool)
            .await?;

            if result.rows_affected() == 1 {
                let mut claimed = candidate;
                claimed.status = TaskStatus::InFlight.as_str().to_string();
                claimed.attempts += 1;
                claimed.claimed_at = Some(now);
                return Ok(Some(claimed));
            }

            // Another worker won this row; take the next candidate.
        }

        Ok(None)
    }

    async fn requeue_expired(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_task
            SET status = 'QUEUED', claimed_at = NULL
            WHERE status = 'IN_FLIGHT'
              AND claimed_at IS NOT NULL
              AND claimed_at < ?
            "#,
        )
        .bind(cutoff_ms)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn prune_finished_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM delivery_task
            WHERE status IN ('SENT', 'FAILED')
              AND finished_at IS NOT NULL
              AND finished_at < ?
            "#,
        )
        .bind(cutoff_ms)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_queued(&self) -> Result<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_task WHERE status = 'QUEUED'")
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn list_for_broadcast(&self, broadcast_id: &str) -> Result<Vec<DeliveryTaskDbModel>> {
        let tasks = sqlx::query_as::<_, DeliveryTaskDbModel>(
            "SELECT * FROM delivery_task WHERE broadcast_id = ? ORDER BY id",
        )
        .bind(broadcast_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }
}
