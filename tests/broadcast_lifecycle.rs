//! End-to-end broadcast lifecycle over a real file-backed database.
//!
//! Each scenario drives the full service container: directory resolution,
//! fan-out, the worker pool, outcome counting, and finalization.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fanout::adapter::{DeliveryAdapter, DeliveryError};
use fanout::database::{DbPool, WritePool, init_pool, init_write_pool, run_migrations};
use fanout::domain::{
    BroadcastRecord, BroadcastStatus, DeliveryOutcome, MessageContent, PlatformMessageId,
    Recipient, TargetSelector,
};
use fanout::engine::{DeliveryWorkerConfig, OutcomeApplied, QueueMaintenanceConfig};
use fanout::services::ServiceContainer;

/// Adapter that fails every recipient whose id starts with `bad-`.
struct ScriptedAdapter;

#[async_trait]
impl DeliveryAdapter for ScriptedAdapter {
    fn adapter_type(&self) -> &'static str {
        "scripted"
    }

    async fn send(
        &self,
        recipient: &Recipient,
        _content: &MessageContent,
    ) -> Result<PlatformMessageId, DeliveryError> {
        if recipient.id.starts_with("bad-") {
            Err(DeliveryError::RecipientUnreachable("blocked".into()))
        } else {
            Ok(PlatformMessageId(format!("msg-{}", recipient.id)))
        }
    }
}

/// Adapter whose `bad-` recipients fail until it is healed.
struct HealableAdapter {
    healed: AtomicBool,
}

impl HealableAdapter {
    fn new() -> Self {
        Self {
            healed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DeliveryAdapter for HealableAdapter {
    fn adapter_type(&self) -> &'static str {
        "healable"
    }

    async fn send(
        &self,
        recipient: &Recipient,
        _content: &MessageContent,
    ) -> Result<PlatformMessageId, DeliveryError> {
        if recipient.id.starts_with("bad-") && !self.healed.load(Ordering::SeqCst) {
            Err(DeliveryError::RecipientUnreachable("blocked".into()))
        } else {
            Ok(PlatformMessageId(format!("msg-{}", recipient.id)))
        }
    }
}

async fn setup_pools(dir: &TempDir) -> (DbPool, WritePool) {
    let db_path = dir.path().join("fanout.db");
    let db_url = format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    );

    let pool = init_pool(&db_url).await.unwrap();
    let write_pool = init_write_pool(&db_url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (pool, write_pool)
}

async fn seed_recipient(pool: &DbPool, id: &str, active: bool) {
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO recipient (id, address, is_active, last_seen_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(format!("chat-{id}"))
    .bind(active as i64)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
}

fn fast_worker_config() -> DeliveryWorkerConfig {
    DeliveryWorkerConfig {
        max_workers: 2,
        send_timeout_secs: 5,
        poll_interval_ms: 10,
    }
}

async fn build_container(
    pool: &DbPool,
    write_pool: &WritePool,
    adapter: Arc<dyn DeliveryAdapter>,
) -> ServiceContainer {
    ServiceContainer::with_config(
        pool.clone(),
        write_pool.clone(),
        adapter,
        fast_worker_config(),
        QueueMaintenanceConfig::default(),
    )
    .await
    .unwrap()
}

async fn wait_for_terminal(container: &ServiceContainer, id: &str) -> BroadcastRecord {
    for _ in 0..500 {
        let record = container.coordinator.get_broadcast(id).await.unwrap();
        if record.status.is_terminal() {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("broadcast {id} never reached a terminal status");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_completes_when_every_delivery_succeeds() {
    let dir = TempDir::new().unwrap();
    let (pool, write_pool) = setup_pools(&dir).await;
    for id in ["r1", "r2", "r3"] {
        seed_recipient(&pool, id, true).await;
    }
    // Inactive recipients are invisible to an active-only selector
    seed_recipient(&pool, "r4-dormant", false).await;

    let container = build_container(&pool, &write_pool, Arc::new(ScriptedAdapter)).await;
    container.initialize().await.unwrap();

    let record = container
        .coordinator
        .create_broadcast(MessageContent::text("hello"), TargetSelector::ActiveOnly)
        .await
        .unwrap();
    assert_eq!(record.total_recipients, 3);

    let done = wait_for_terminal(&container, &record.id).await;
    assert_eq!(done.status, BroadcastStatus::Completed);
    assert_eq!(done.sent_count, 3);
    assert_eq!(done.failed_count, 0);
    assert!(done.finalized_at.is_some());

    let tasks: Vec<(String, String, Option<String>)> = sqlx::query_as(
        "SELECT recipient_id, status, platform_message_id FROM delivery_task \
         WHERE broadcast_id = ? ORDER BY recipient_id",
    )
    .bind(&record.id)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(tasks.len(), 3);
    for (recipient_id, status, message_id) in &tasks {
        assert_eq!(status, "SENT");
        assert_eq!(message_id.as_deref(), Some(format!("msg-{recipient_id}").as_str()));
    }

    container.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_outcomes_complete_with_errors() {
    let dir = TempDir::new().unwrap();
    let (pool, write_pool) = setup_pools(&dir).await;
    for id in ["r1", "r2", "bad-r3"] {
        seed_recipient(&pool, id, true).await;
    }

    let container = build_container(&pool, &write_pool, Arc::new(ScriptedAdapter)).await;
    container.initialize().await.unwrap();

    let record = container
        .coordinator
        .create_broadcast(MessageContent::text("mixed bag"), TargetSelector::All)
        .await
        .unwrap();

    let done = wait_for_terminal(&container, &record.id).await;
    assert_eq!(done.status, BroadcastStatus::CompletedWithErrors);
    assert_eq!(done.sent_count, 2);
    assert_eq!(done.failed_count, 1);
    assert!(done.finalized_at.is_some());

    // The failure reason survives on the task row for audit
    let (status, last_error): (String, Option<String>) = sqlx::query_as(
        "SELECT status, last_error FROM delivery_task \
         WHERE broadcast_id = ? AND recipient_id = 'bad-r3'",
    )
    .bind(&record.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "FAILED");
    assert!(last_error.unwrap().contains("unreachable"));

    container.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn broadcast_fails_when_nothing_is_delivered() {
    let dir = TempDir::new().unwrap();
    let (pool, write_pool) = setup_pools(&dir).await;
    for id in ["bad-r1", "bad-r2"] {
        seed_recipient(&pool, id, true).await;
    }

    let container = build_container(&pool, &write_pool, Arc::new(ScriptedAdapter)).await;
    container.initialize().await.unwrap();

    let record = container
        .coordinator
        .create_broadcast(MessageContent::text("doomed"), TargetSelector::All)
        .await
        .unwrap();

    let done = wait_for_terminal(&container, &record.id).await;
    assert_eq!(done.status, BroadcastStatus::Failed);
    assert_eq!(done.sent_count, 0);
    assert_eq!(done.failed_count, 2);
    assert!(done.finalized_at.is_some());

    container.shutdown().await.unwrap();
}

#[tokio::test]
async fn cancelled_broadcast_keeps_counting_without_finalizing() {
    let dir = TempDir::new().unwrap();
    let (pool, write_pool) = setup_pools(&dir).await;
    for id in ["r1", "r2"] {
        seed_recipient(&pool, id, true).await;
    }

    // No initialize(): workers stay off, so the broadcast sits PENDING with
    // its tasks still queued when the cancel lands
    let container = build_container(&pool, &write_pool, Arc::new(ScriptedAdapter)).await;

    let record = container
        .coordinator
        .create_broadcast(MessageContent::text("halt me"), TargetSelector::All)
        .await
        .unwrap();

    let cancelled = container
        .coordinator
        .cancel_broadcast(&record.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, BroadcastStatus::Cancelled);

    // An outcome arriving after the cancel still counts for the audit trail
    let outcome = DeliveryOutcome::Sent {
        platform_message_id: PlatformMessageId("msg-r1".into()),
    };
    let applied = container
        .aggregator
        .report(&record.id, "r1", &outcome)
        .await
        .unwrap();
    assert!(matches!(applied, OutcomeApplied::Counted(_)));

    // A duplicate of the same outcome is dropped
    let applied = container
        .aggregator
        .report(&record.id, "r1", &outcome)
        .await
        .unwrap();
    assert_eq!(applied, OutcomeApplied::Duplicate);

    let after = container
        .coordinator
        .get_broadcast(&record.id)
        .await
        .unwrap();
    assert_eq!(after.status, BroadcastStatus::Cancelled);
    assert_eq!(after.sent_count, 1);
    assert!(after.finalized_at.is_none());

    container.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_broadcast_retries_as_fresh_record() {
    let dir = TempDir::new().unwrap();
    let (pool, write_pool) = setup_pools(&dir).await;
    for id in ["bad-r1", "bad-r2"] {
        seed_recipient(&pool, id, true).await;
    }

    let adapter = Arc::new(HealableAdapter::new());
    let container = build_container(&pool, &write_pool, adapter.clone()).await;
    container.initialize().await.unwrap();

    let record = container
        .coordinator
        .create_broadcast(MessageContent::text("try again"), TargetSelector::All)
        .await
        .unwrap();

    let failed = wait_for_terminal(&container, &record.id).await;
    assert_eq!(failed.status, BroadcastStatus::Failed);
    assert_eq!(failed.failed_count, 2);

    // Platform recovers; the retry resolves its recipient set fresh
    adapter.healed.store(true, Ordering::SeqCst);

    let retried = container.retry_coordinator.retry(&record.id).await.unwrap();
    assert_ne!(retried.id, record.id);
    assert_eq!(retried.retry_of.as_deref(), Some(record.id.as_str()));

    let done = wait_for_terminal(&container, &retried.id).await;
    assert_eq!(done.status, BroadcastStatus::Completed);
    assert_eq!(done.sent_count, 2);
    assert_eq!(done.failed_count, 0);

    // The source record is never mutated by its retry
    let source = container
        .coordinator
        .get_broadcast(&record.id)
        .await
        .unwrap();
    assert_eq!(source.status, BroadcastStatus::Failed);
    assert_eq!(source.failed_count, 2);

    container.shutdown().await.unwrap();
}
