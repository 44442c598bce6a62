//! Broadcast creation and cancellation.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::aggregator::StatusAggregator;
use super::queue::DeliveryQueue;
use super::resolver::RecipientResolver;
use crate::database::models::NewDeliveryTask;
use crate::database::repositories::BroadcastRepository;
use crate::domain::{BroadcastRecord, MessageContent, TargetSelector};
use crate::{Error, Result};

/// Drives a broadcast from operator request to queued delivery tasks.
///
/// Creation order matters: the record is persisted first so an ID exists,
/// then recipients are resolved, then the total is written, and only then
/// are tasks enqueued. Outcomes can start arriving the moment the first
/// task is visible, and the finalization check needs the total to already
/// be in place by then.
pub struct BroadcastCoordinator {
    broadcast_repo: Arc<dyn BroadcastRepository>,
    resolver: Arc<RecipientResolver>,
    queue: Arc<DeliveryQueue>,
    aggregator: Arc<StatusAggregator>,
}

impl BroadcastCoordinator {
    pub fn new(
        broadcast_repo: Arc<dyn BroadcastRepository>,
        resolver: Arc<RecipientResolver>,
        queue: Arc<DeliveryQueue>,
        aggregator: Arc<StatusAggregator>,
    ) -> Self {
        Self {
            broadcast_repo,
            resolver,
            queue,
            aggregator,
        }
    }

    /// Create a broadcast and fan it out.
    pub async fn create_broadcast(
        &self,
        content: MessageContent,
        selector: TargetSelector,
    ) -> Result<BroadcastRecord> {
        content.validate()?;

        let record = BroadcastRecord::new(content, selector);
        info!(
            "Creating broadcast {} (selector: {})",
            record.id,
            record.target_selector.kind()
        );

        self.run_fanout(record).await
    }

    /// Persist a prepared record and fan it out to delivery tasks.
    ///
    /// Shared by creation and retry; the caller owns content validation.
    pub(crate) async fn run_fanout(&self, record: BroadcastRecord) -> Result<BroadcastRecord> {
        self.broadcast_repo.create(&record).await?;

        let recipients = match self.resolver.resolve(&record.target_selector).await {
            Ok(recipients) => recipients,
            Err(err) => {
                // The placeholder must not be left PENDING with no tasks
                if let Err(finalize_err) = self.broadcast_repo.finalize_failed(&record.id).await {
                    error!(
                        "Failed to finalize broadcast {} after resolution error: {}",
                        record.id, finalize_err
                    );
                }
                return Err(err);
            }
        };

        if recipients.is_empty() {
            self.broadcast_repo.finalize_failed(&record.id).await?;
            info!(
                "Broadcast {} resolved to zero recipients, marked FAILED",
                record.id
            );
            return self.broadcast_repo.get_broadcast(&record.id).await;
        }

        let total = recipients.len() as i64;
        self.broadcast_repo
            .set_total_recipients(&record.id, total)
            .await?;

        let content_json = serde_json::to_string(&record.content)?;
        let mut enqueue_failures = 0usize;

        for recipient in &recipients {
            let task = NewDeliveryTask::new(&record.id, recipient, &content_json);

            if let Err(err) = self.queue.enqueue(&task).await {
                warn!(
                    "Failed to enqueue delivery for broadcast {} recipient {}: {}",
                    record.id, recipient.id, err
                );
                enqueue_failures += 1;

                if let Err(report_err) = self
                    .aggregator
                    .report_enqueue_failure(&task, &err.to_string())
                    .await
                {
                    error!(
                        "Failed to record enqueue failure for broadcast {} recipient {}: {}",
                        record.id, recipient.id, report_err
                    );
                }
            }
        }

        if enqueue_failures > 0 {
            warn!(
                "Broadcast {} fanned out to {} recipients with {} enqueue failures",
                record.id, total, enqueue_failures
            );
        } else {
            info!("Broadcast {} fanned out to {} recipients", record.id, total);
        }

        self.broadcast_repo.get_broadcast(&record.id).await
    }

    /// Cancel a PENDING broadcast.
    ///
    /// Already-enqueued tasks are not recalled; their outcomes keep counting
    /// but the status stays CANCELLED.
    pub async fn cancel_broadcast(&self, id: &str) -> Result<BroadcastRecord> {
        // Existence check first so a missing ID is NotFound, not a conflict
        self.broadcast_repo.get_broadcast(id).await?;

        let affected = self.broadcast_repo.cancel(id).await?;
        if affected == 0 {
            let current = self.broadcast_repo.get_broadcast(id).await?;
            return Err(Error::CancelNotAllowed {
                id: id.to_string(),
                status: current.status.to_string(),
            });
        }

        info!("Broadcast {} cancelled", id);
        self.broadcast_repo.get_broadcast(id).await
    }

    /// Fetch a broadcast by ID.
    pub async fn get_broadcast(&self, id: &str) -> Result<BroadcastRecord> {
        self.broadcast_repo.get_broadcast(id).await
    }

    /// List broadcasts, newest first, with the total count for pagination.
    pub async fn list_broadcasts(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<BroadcastRecord>, i64)> {
        let broadcasts = self.broadcast_repo.list(limit, offset).await?;
        let total = self.broadcast_repo.count_all().await?;
        Ok((broadcasts, total))
    }

    /// Aggregate delivery statistics across all broadcasts.
    pub async fn stats(&self) -> Result<crate::database::models::BroadcastStats> {
        self.broadcast_repo.stats().await
    }
}
