//! Transactional operations for delivery outcomes.
//!
//! This module provides transaction-aware operations for recording a delivery
//! outcome. The task-row transition and the broadcast counter update must land
//! in the same transaction so a task is counted exactly once.

use sqlx::SqliteConnection;

use crate::database::models::{BroadcastDbModel, NewDeliveryTask};
use crate::database::time::now_ms;
use crate::domain::TaskStatus;
use crate::{Error, Result};

/// Transactional operations for delivery outcomes.
///
/// These methods operate within an existing transaction and do NOT commit.
/// The caller is responsible for committing or rolling back the transaction.
pub struct OutcomeTxOps;

impl OutcomeTxOps {
    /// Move a live task to its terminal status.
    ///
    /// The conditional update is the dedup gate: only a QUEUED or IN_FLIGHT
    /// row can be finished, so a second report for the same (broadcast,
    /// recipient) affects 0 rows and must not be counted.
    pub async fn finish_task(
        tx: &mut SqliteConnection,
        broadcast_id: &str,
        recipient_id: &str,
        status: TaskStatus,
        platform_message_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<u64> {
        if !status.is_terminal() {
            return Err(Error::validation(format!(
                "cannot finish task with non-terminal status {status}"
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE delivery_task
            SET status = ?, platform_message_id = ?, last_error = ?, finished_at = ?
            WHERE broadcast_id = ? AND recipient_id = ? AND status IN ('QUEUED', 'IN_FLIGHT')
            "#,
        )
        .bind(status.as_str())
        .bind(platform_message_id)
        .bind(error)
        .bind(now_ms())
        .bind(broadcast_id)
        .bind(recipient_id)
        .execute(tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Insert a task directly in FAILED state.
    ///
    /// Used when enqueueing itself fails and no QUEUED row exists to finish.
    /// The conflict clause keeps the (broadcast, recipient) identity unique:
    /// 0 rows means a task for this pair already exists and owns the outcome.
    pub async fn insert_failed_task(
        tx: &mut SqliteConnection,
        task: &NewDeliveryTask,
        error: &str,
    ) -> Result<u64> {
        let now = now_ms();

        let result = sqlx::query(
            r#"
            INSERT INTO delivery_task (
                broadcast_id, recipient_id, address, content, status, attempts,
                last_error, created_at, finished_at
            ) VALUES (?, ?, ?, ?, 'FAILED', 0, ?, ?, ?)
            ON CONFLICT (broadcast_id, recipient_id) DO NOTHING
            "#,
        )
        .bind(&task.broadcast_id)
        .bind(&task.recipient_id)
        .bind(&task.address)
        .bind(&task.content)
        .bind(error)
        .bind(now)
        .bind(now)
        .execute(tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Apply one counted outcome to the broadcast row.
    ///
    /// Increments the counter and, when this outcome is the last one for a
    /// still-PENDING broadcast, derives the terminal status in the same
    /// statement. SQLite evaluates every right-hand side against the
    /// pre-update row, so the CASE arms see the old counters plus the delta.
    ///
    /// A CANCELLED broadcast keeps counting but never finalizes; any other
    /// terminal status rejects the outcome (0 rows affected).
    pub async fn apply_to_broadcast(
        tx: &mut SqliteConnection,
        broadcast_id: &str,
        sent_delta: i64,
        failed_delta: i64,
    ) -> Result<u64> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE broadcast
            SET sent_count = sent_count + ?,
                failed_count = failed_count + ?,
                finalized_at = CASE
                    WHEN status = 'PENDING'
                     AND sent_count + failed_count + ? + ? >= total_recipients
                    THEN ?
                    ELSE finalized_at
                END,
                status = CASE
                    WHEN status = 'PENDING'
                     AND sent_count + failed_count + ? + ? >= total_recipients
                    THEN CASE
                        WHEN total_recipients = 0 THEN 'FAILED'
                        WHEN failed_count + ? = 0 THEN 'COMPLETED'
                        WHEN sent_count + ? = 0 THEN 'FAILED'
                        ELSE 'COMPLETED_WITH_ERRORS'
                    END
                    ELSE status
                END
            WHERE id = ? AND status IN ('PENDING', 'CANCELLED')
            "#,
        )
        .bind(sent_delta)
        .bind(failed_delta)
        .bind(sent_delta)
        .bind(failed_delta)
        .bind(&now)
        .bind(sent_delta)
        .bind(failed_delta)
        .bind(failed_delta)
        .bind(sent_delta)
        .bind(broadcast_id)
        .execute(tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Read the broadcast row back within the transaction.
    pub async fn fetch_broadcast(
        tx: &mut SqliteConnection,
        broadcast_id: &str,
    ) -> Result<BroadcastDbModel> {
        sqlx::query_as::<_, BroadcastDbModel>("SELECT * FROM broadcast WHERE id = ?")
            .bind(broadcast_id)
            .fetch_optional(tx)
            .await?
            .ok_or_else(|| Error::not_found("Broadcast", broadcast_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Recipient;
    use sqlx::SqlitePool;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();

        sqlx::query(
            r#"
            CREATE TABLE broadcast (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                target_selector TEXT NOT NULL,
                total_recipients INTEGER NOT NULL DEFAULT 0,
                sent_count INTEGER NOT NULL DEFAULT 0,
                failed_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'PENDING',
                retry_of TEXT,
                created_at TEXT NOT NULL,
                finalized_at TEXT
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            r#"
            CREATE TABLE delivery_task (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                broadcast_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                address TEXT NOT NULL,
                content TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'QUEUED',
                attempts INTEGER NOT NULL DEFAULT 0,
                platform_message_id TEXT,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                claimed_at INTEGER,
                finished_at INTEGER,
                UNIQUE (broadcast_id, recipient_id)
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    async fn insert_broadcast(pool: &SqlitePool, id: &str, total: i64, status: &str) {
        sqlx::query(
            r#"
            INSERT INTO broadcast (id, content, target_selector, total_recipients, status, created_at)
            VALUES (?, '{"text":"hi"}', '{"type":"all"}', ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(total)
        .bind(status)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    async fn insert_task(pool: &SqlitePool, broadcast_id: &str, recipient_id: &str, status: &str) {
        sqlx::query(
            r#"
            INSERT INTO delivery_task (broadcast_id, recipient_id, address, content, status, created_at)
            VALUES (?, ?, ?, '{"text":"hi"}', ?, ?)
            "#,
        )
        .bind(broadcast_id)
        .bind(recipient_id)
        .bind(format!("chat-{recipient_id}"))
        .bind(status)
        .bind(now_ms())
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_finish_task_gates_duplicates() {
        let pool = setup_test_db().await;
        insert_task(&pool, "b1", "r1", "IN_FLIGHT").await;

        let mut tx = pool.begin().await.unwrap();
        let affected =
            OutcomeTxOps::finish_task(&mut tx, "b1", "r1", TaskStatus::Sent, Some("msg-1"), None)
                .await
                .unwrap();
        assert_eq!(affected, 1);
        tx.commit().await.unwrap();

        // Second report for the same pair must not pass the gate
        let mut tx = pool.begin().await.unwrap();
        let affected = OutcomeTxOps::finish_task(
            &mut tx,
            "b1",
            "r1",
            TaskStatus::Failed,
            None,
            Some("late failure"),
        )
        .await
        .unwrap();
        assert_eq!(affected, 0);
        tx.commit().await.unwrap();

        let (status, msg_id): (String, Option<String>) = sqlx::query_as(
            "SELECT status, platform_message_id FROM delivery_task WHERE broadcast_id = 'b1'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "SENT");
        assert_eq!(msg_id.as_deref(), Some("msg-1"));
    }

    #[tokio::test]
    async fn test_finish_task_rejects_non_terminal_status() {
        let pool = setup_test_db().await;
        let mut tx = pool.begin().await.unwrap();

        let err = OutcomeTxOps::finish_task(&mut tx, "b1", "r1", TaskStatus::InFlight, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_apply_increments_and_finalizes_on_last_outcome() {
        let pool = setup_test_db().await;
        insert_broadcast(&pool, "b1", 2, "PENDING").await;

        let mut tx = pool.begin().await.unwrap();
        assert_eq!(
            OutcomeTxOps::apply_to_broadcast(&mut tx, "b1", 1, 0)
                .await
                .unwrap(),
            1
        );
        let state = OutcomeTxOps::fetch_broadcast(&mut tx, "b1").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(state.sent_count, 1);
        assert_eq!(state.status, "PENDING");
        assert!(state.finalized_at.is_none());

        let mut tx = pool.begin().await.unwrap();
        OutcomeTxOps::apply_to_broadcast(&mut tx, "b1", 0, 1)
            .await
            .unwrap();
        let state = OutcomeTxOps::fetch_broadcast(&mut tx, "b1").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(state.sent_count, 1);
        assert_eq!(state.failed_count, 1);
        assert_eq!(state.status, "COMPLETED_WITH_ERRORS");
        assert!(state.finalized_at.is_some());
    }

    #[tokio::test]
    async fn test_apply_all_sent_completes() {
        let pool = setup_test_db().await;
        insert_broadcast(&pool, "b1", 1, "PENDING").await;

        let mut tx = pool.begin().await.unwrap();
        OutcomeTxOps::apply_to_broadcast(&mut tx, "b1", 1, 0)
            .await
            .unwrap();
        let state = OutcomeTxOps::fetch_broadcast(&mut tx, "b1").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(state.status, "COMPLETED");
    }

    #[tokio::test]
    async fn test_apply_all_failed_gives_failed() {
        let pool = setup_test_db().await;
        insert_broadcast(&pool, "b1", 2, "PENDING").await;

        for _ in 0..2 {
            let mut tx = pool.begin().await.unwrap();
            OutcomeTxOps::apply_to_broadcast(&mut tx, "b1", 0, 1)
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        let (status,): (String,) = sqlx::query_as("SELECT status FROM broadcast WHERE id = 'b1'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(status, "FAILED");
    }

    #[tokio::test]
    async fn test_apply_after_cancel_counts_without_finalizing() {
        let pool = setup_test_db().await;
        insert_broadcast(&pool, "b1", 1, "CANCELLED").await;

        let mut tx = pool.begin().await.unwrap();
        assert_eq!(
            OutcomeTxOps::apply_to_broadcast(&mut tx, "b1", 1, 0)
                .await
                .unwrap(),
            1
        );
        let state = OutcomeTxOps::fetch_broadcast(&mut tx, "b1").await.unwrap();
        tx.commit().await.unwrap();

        // Counter moved for the audit trail, status stays CANCELLED even
        // though the counters now cover every recipient
        assert_eq!(state.sent_count, 1);
        assert_eq!(state.status, "CANCELLED");
        assert!(state.finalized_at.is_none());
    }

    #[tokio::test]
    async fn test_apply_after_completion_rejected() {
        let pool = setup_test_db().await;
        insert_broadcast(&pool, "b1", 1, "COMPLETED").await;

        let mut tx = pool.begin().await.unwrap();
        assert_eq!(
            OutcomeTxOps::apply_to_broadcast(&mut tx, "b1", 1, 0)
                .await
                .unwrap(),
            0
        );
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_failed_task_respects_existing_row() {
        let pool = setup_test_db().await;
        insert_task(&pool, "b1", "r1", "QUEUED").await;

        let recipient = Recipient::new("r1", "chat-r1");
        let task = NewDeliveryTask::new("b1", &recipient, "{\"text\":\"hi\"}");

        let mut tx = pool.begin().await.unwrap();
        let affected = OutcomeTxOps::insert_failed_task(&mut tx, &task, "enqueue exploded")
            .await
            .unwrap();
        assert_eq!(affected, 0);
        tx.rollback().await.unwrap();

        // A pair with no existing row inserts fine
        let other = Recipient::new("r2", "chat-r2");
        let task = NewDeliveryTask::new("b1", &other, "{\"text\":\"hi\"}");

        let mut tx = pool.begin().await.unwrap();
        let affected = OutcomeTxOps::insert_failed_task(&mut tx, &task, "enqueue exploded")
            .await
            .unwrap();
        assert_eq!(affected, 1);
        tx.commit().await.unwrap();

        let (status, error): (String, Option<String>) = sqlx::query_as(
            "SELECT status, last_error FROM delivery_task WHERE recipient_id = 'r2'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(status, "FAILED");
        assert_eq!(error.as_deref(), Some("enqueue exploded"));
    }
}
