//! Broadcast repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{BroadcastDbModel, BroadcastStats};
use crate::domain::BroadcastRecord;
use crate::{Error, Result};

/// Broadcast repository trait for broadcast data access operations.
#[async_trait]
pub trait BroadcastRepository: Send + Sync {
    /// Persist a new broadcast record.
    async fn create(&self, record: &BroadcastRecord) -> Result<()>;

    /// Fetch a broadcast by ID.
    async fn get_broadcast(&self, id: &str) -> Result<BroadcastRecord>;

    /// List broadcasts, newest first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<BroadcastRecord>>;

    /// Total number of broadcast records.
    async fn count_all(&self) -> Result<i64>;

    /// Set the recipient total once resolution has finished.
    ///
    /// Only applies while the broadcast is still PENDING. Returns the number
    /// of rows updated.
    async fn set_total_recipients(&self, id: &str, total: i64) -> Result<u64>;

    /// Move a PENDING broadcast to CANCELLED.
    ///
    /// Returns 0 when the broadcast has already left PENDING.
    async fn cancel(&self, id: &str) -> Result<u64>;

    /// Move a PENDING broadcast straight to FAILED.
    ///
    /// Used when resolution yields no recipients or fails outright, before
    /// any delivery task exists. Returns 0 when the broadcast has already
    /// left PENDING.
    async fn finalize_failed(&self, id: &str) -> Result<u64>;

    /// Aggregate counters across all broadcasts.
    async fn stats(&self) -> Result<BroadcastStats>;
}

/// SQLx implementation of BroadcastRepository.
pub struct SqlxBroadcastRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxBroadcastRepository {
    /// Create a new SqlxBroadcastRepository with the given connection pools.
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl BroadcastRepository for SqlxBroadcastRepository {
    async fn create(&self, record: &BroadcastRecord) -> Result<()> {
        let model = BroadcastDbModel::from_record(record)?;

        sqlx::query(
            r#"
            INSERT INTO broadcast (
                id, content, target_selector, total_recipients, sent_count,
                failed_count, status, retry_of, created_at, finalized_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.id)
        .bind(&model.content)
        .bind(&model.target_selector)
        .bind(model.total_recipients)
        .bind(model.sent_count)
        .bind(model.failed_count)
        .bind(&model.status)
        .bind(&model.retry_of)
        .bind(&model.created_at)
        .bind(&model.finalized_at)
        .execute(&self.write_pool)
        .await?;
        Ok(())
    }

    async fn get_broadcast(&self, id: &str) -> Result<BroadcastRecord> {
        let model = sqlx::query_as::<_, BroadcastDbModel>("SELECT * FROM broadcast WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Broadcast", id))?;

        model.into_record()
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<BroadcastRecord>> {
        let models = sqlx::query_as::<_, BroadcastDbModel>(
            "SELECT * FROM broadcast ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        models.into_iter().map(|m| m.into_record()).collect()
    }

    async fn count_all(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM broadcast")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn set_total_recipients(&self, id: &str, total: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE broadcast SET total_recipients = ? WHERE id = ? AND status = 'PENDING'",
        )
        .bind(total)
        .bind(id)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cancel(&self, id: &str) -> Result<u64> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE broadcast
            SET status = 'CANCELLED', finalized_at = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(&now)
        .bind(id)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn finalize_failed(&self, id: &str) -> Result<u64> {
        let now = chrono::Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            UPDATE broadcast
            SET status = 'FAILED', finalized_at = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(&now)
        .bind(id)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats(&self) -> Result<BroadcastStats> {
        let stats = sqlx::query_as::<_, BroadcastStats>(
            r#"
            SELECT
                COUNT(*) AS total_broadcasts,
                COALESCE(SUM(sent_count), 0) AS total_sent,
                COALESCE(SUM(failed_count), 0) AS total_failed
            FROM broadcast
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BroadcastStatus, MessageContent, TargetSelector};
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

        pool
    }

    fn test_record() -> BroadcastRecord {
        BroadcastRecord::new(MessageContent::text("hello"), TargetSelector::ActiveOnly)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = setup_test_db().await;
        let repo = SqlxBroadcastRepository::new(pool.clone(), pool);

        let record = test_record();
        repo.create(&record).await.unwrap();

        let fetched = repo.get_broadcast(&record.id).await.unwrap();
        assert_eq!(fetched.id, record.id);
        assert_eq!(fetched.content.text, "hello");
        assert_eq!(fetched.status, BroadcastStatus::Pending);
        assert_eq!(fetched.total_recipients, 0);
    }

    #[tokio::test]
    async fn test_get_missing_returns_not_found() {
        let pool = setup_test_db().await;
        let repo = SqlxBroadcastRepository::new(pool.clone(), pool);

        let err = repo.get_broadcast("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cancel_only_pending() {
        let pool = setup_test_db().await;
        let repo = SqlxBroadcastRepository::new(pool.clone(), pool);

        let record = test_record();
        repo.create(&record).await.unwrap();

        assert_eq!(repo.cancel(&record.id).await.unwrap(), 1);

        let cancelled = repo.get_broadcast(&record.id).await.unwrap();
        assert_eq!(cancelled.status, BroadcastStatus::Cancelled);
        assert!(cancelled.finalized_at.is_some());

        // Second cancel is a no-op: status left PENDING already
        assert_eq!(repo.cancel(&record.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_total_guarded_by_pending() {
        let pool = setup_test_db().await;
        let repo = SqlxBroadcastRepository::new(pool.clone(), pool);

        let record = test_record();
        repo.create(&record).await.unwrap();

        assert_eq!(repo.set_total_recipients(&record.id, 25).await.unwrap(), 1);

        repo.cancel(&record.id).await.unwrap();
        assert_eq!(repo.set_total_recipients(&record.id, 99).await.unwrap(), 0);

        let fetched = repo.get_broadcast(&record.id).await.unwrap();
        assert_eq!(fetched.total_recipients, 25);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let pool = setup_test_db().await;
        let repo = SqlxBroadcastRepository::new(pool.clone(), pool);

        for i in 0..3 {
            let mut record = test_record();
            record.created_at = chrono::Utc::now() + chrono::Duration::seconds(i);
            repo.create(&record).await.unwrap();
        }

        let page = repo.list(2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].created_at >= page[1].created_at);
        assert_eq!(repo.count_all().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_stats_sums_counters() {
        let pool = setup_test_db().await;
        let repo = SqlxBroadcastRepository::new(pool.clone(), pool.clone());

        let record = test_record();
        repo.create(&record).await.unwrap();

        sqlx::query("UPDATE broadcast SET sent_count = 7, failed_count = 3 WHERE id = ?")
            .bind(&record.id)
            .execute(&pool)
            .await
            .unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total_broadcasts, 1);
        assert_eq!(stats.total_sent, 7);
        assert_eq!(stats.total_failed, 3);
    }
}
