//! Exactly-once counting under worker/reporter contention.
//!
//! The worker pool delivers every task while duplicate reports for the same
//! recipients race it through the aggregator. Both sides produce the same
//! outcome per recipient, so whoever wins each task's terminal transition the
//! final counters must come out exact: one counted outcome per recipient and
//! a single PENDING-to-terminal flip for the broadcast.

use dashmap::DashSet;
use rand::random;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::task::JoinSet;

use fanout::adapter::{DeliveryAdapter, DeliveryError};
use fanout::database::{DbPool, init_pool, init_write_pool, run_migrations};
use fanout::domain::{
    BroadcastStatus, DeliveryOutcome, MessageContent, PlatformMessageId, Recipient, TargetSelector,
};
use fanout::engine::{DeliveryWorkerConfig, OutcomeApplied, QueueMaintenanceConfig};
use fanout::services::ServiceContainer;

const FAILURE_REASON: &str = "recipient unreachable: blocked";

/// Fails every recipient whose id ends in a multiple of three.
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
        if is_unreachable(&recipient.id) {
            Err(DeliveryError::RecipientUnreachable("blocked".into()))
        } else {
            Ok(PlatformMessageId(format!("msg-{}", recipient.id)))
        }
    }
}

fn recipient_id(i: usize) -> String {
    format!("r-{i:03}")
}

fn recipient_index(id: &str) -> usize {
    id.trim_start_matches("r-").parse().unwrap()
}

fn is_unreachable(id: &str) -> bool {
    recipient_index(id) % 3 == 0
}

fn scripted_outcome(id: &str) -> DeliveryOutcome {
    if is_unreachable(id) {
        DeliveryOutcome::failed(FAILURE_REASON)
    } else {
        DeliveryOutcome::Sent {
            platform_message_id: PlatformMessageId(format!("msg-{id}")),
        }
    }
}

async fn seed_recipients(pool: &DbPool, count: usize) {
    let now = chrono::Utc::now().to_rfc3339();
    for i in 0..count {
        let id = recipient_id(i);
        sqlx::query(
            "INSERT INTO recipient (id, address, is_active, last_seen_at, created_at) VALUES (?, ?, 1, ?, ?)",
        )
        .bind(&id)
        .bind(format!("chat-{id}"))
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore = "stress test; run explicitly to validate exactly-once outcome counting under contention"]
async fn concurrent_workers_and_duplicate_reports_count_each_recipient_once() {
    const RECIPIENTS: usize = 200;
    const REPORTS_PER_RECIPIENT: usize = 4;

    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("stress.db");
    let db_url = format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    );

    let pool = init_pool(&db_url).await.unwrap();
    let write_pool = init_write_pool(&db_url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    seed_recipients(&pool, RECIPIENTS).await;

    let container = ServiceContainer::with_config(
        pool.clone(),
        write_pool.clone(),
        Arc::new(ScriptedAdapter),
        DeliveryWorkerConfig {
            max_workers: 4,
            send_timeout_secs: 5,
            poll_interval_ms: 5,
        },
        QueueMaintenanceConfig::default(),
    )
    .await
    .unwrap();
    container.initialize().await.unwrap();

    let record = container
        .coordinator
        .create_broadcast(MessageContent::text("stress"), TargetSelector::All)
        .await
        .unwrap();
    assert_eq!(record.total_recipients, RECIPIENTS as i64);

    // Reporters race the worker pool for every task's terminal transition
    let counted = Arc::new(DashSet::<String>::new());
    let duplicates = Arc::new(AtomicUsize::new(0));

    let mut reporters = JoinSet::new();
    for i in 0..RECIPIENTS {
        for _ in 0..REPORTS_PER_RECIPIENT {
            let aggregator = container.aggregator.clone();
            let broadcast_id = record.id.clone();
            let counted = counted.clone();
            let duplicates = duplicates.clone();

            reporters.spawn(async move {
                // Tiny jitter to widen the interleavings
                if random::<u8>() % 2 == 0 {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(Duration::from_millis(random::<u64>() % 3)).await;
                }

                let id = recipient_id(i);
                let outcome = scripted_outcome(&id);

                let applied = aggregator.report(&broadcast_id, &id, &outcome).await.unwrap();
                match applied {
                    OutcomeApplied::Counted(_) => {
                        let inserted = counted.insert(id.clone());
                        assert!(inserted, "recipient {id} was counted twice by reporters");
                    }
                    OutcomeApplied::Duplicate => {
                        duplicates.fetch_add(1, Ordering::SeqCst);
                    }
                    OutcomeApplied::Rejected => {
                        panic!("report for {id} was rejected on a live broadcast");
                    }
                }
            });
        }
    }

    let joined = tokio::time::timeout(Duration::from_secs(60), async {
        while let Some(res) = reporters.join_next().await {
            res.unwrap();
        }
    })
    .await;
    assert!(joined.is_ok(), "reporters timed out (possible deadlock)");

    // Workers may still own the last few transitions; wait for finalization
    let mut done = None;
    for _ in 0..1500 {
        let current = container
            .coordinator
            .get_broadcast(&record.id)
            .await
            .unwrap();
        if current.status.is_terminal() {
            done = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let done = done.expect("broadcast never finalized");

    let n_bad = (0..RECIPIENTS)
        .filter(|i| is_unreachable(&recipient_id(*i)))
        .count();
    let n_good = RECIPIENTS - n_bad;

    // Same outcome script on both sides, so the split is exact regardless of
    // which side won each gate
    assert_eq!(done.sent_count, n_good as i64);
    assert_eq!(done.failed_count, n_bad as i64);
    assert_eq!(done.status, BroadcastStatus::CompletedWithErrors);
    assert!(done.finalized_at.is_some());

    let live_tasks: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM delivery_task WHERE broadcast_id = ? AND status NOT IN ('SENT', 'FAILED')",
    )
    .bind(&record.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(live_tasks, 0, "some tasks never reached a terminal status");

    let sent_without_message_id: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM delivery_task \
         WHERE broadcast_id = ? AND status = 'SENT' AND platform_message_id IS NULL",
    )
    .bind(&record.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(sent_without_message_id, 0);

    let failed_without_reason: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM delivery_task \
         WHERE broadcast_id = ? AND status = 'FAILED' AND last_error IS NULL",
    )
    .bind(&record.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(failed_without_reason, 0);

    let total_duplicates = duplicates.load(Ordering::SeqCst);
    assert!(
        total_duplicates >= RECIPIENTS * (REPORTS_PER_RECIPIENT - 1),
        "at most one report per recipient may be counted ({total_duplicates} duplicates for {} reports)",
        RECIPIENTS * REPORTS_PER_RECIPIENT
    );

    container.shutdown().await.unwrap();
}
