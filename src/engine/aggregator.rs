//! Outcome counting and status finalization.

use tracing::{debug, info, warn};

use crate::database::models::NewDeliveryTask;
use crate::database::repositories::OutcomeTxOps;
use crate::database::{ImmediateTransaction, WritePool, begin_immediate, retry::retry_on_sqlite_busy};
use crate::domain::{BroadcastStatus, DeliveryOutcome, TaskStatus};
use crate::{Error, Result};

/// Broadcast counters after an accepted outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeSnapshot {
    pub broadcast_id: String,
    pub sent_count: i64,
    pub failed_count: i64,
    pub total_recipients: i64,
    pub status: BroadcastStatus,
}

impl OutcomeSnapshot {
    /// Whether this outcome completed the broadcast.
    pub fn finalized(&self) -> bool {
        self.status.is_terminal() && self.status != BroadcastStatus::Cancelled
    }
}

/// What happened to a reported outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeApplied {
    /// The outcome was counted; snapshot of the broadcast after the increment.
    Counted(OutcomeSnapshot),
    /// The task was already terminal; nothing was counted.
    Duplicate,
    /// The task transition succeeded but the broadcast no longer accepts
    /// outcomes (terminal and not CANCELLED). Nothing was committed.
    Rejected,
}

/// Applies delivery outcomes to broadcast counters.
///
/// The task-row transition and the counter increment commit in one immediate
/// transaction. The task row acts as the dedup marker: once terminal, further
/// reports for the same (broadcast, recipient) are dropped. Finalization rides
/// on the increment statement itself, so exactly one report can move the
/// broadcast out of PENDING.
pub struct StatusAggregator {
    write_pool: WritePool,
}

impl StatusAggregator {
    pub fn new(write_pool: WritePool) -> Self {
        Self { write_pool }
    }

    /// Record a delivery outcome reported by a worker.
    pub async fn report(
        &self,
        broadcast_id: &str,
        recipient_id: &str,
        outcome: &DeliveryOutcome,
    ) -> Result<OutcomeApplied> {
        let status = outcome.task_status();
        let (platform_message_id, error) = match outcome {
            DeliveryOutcome::Sent {
                platform_message_id,
            } => (Some(platform_message_id.as_str()), None),
            DeliveryOutcome::Failed { reason } => (None, Some(reason.as_str())),
        };

        let applied = retry_on_sqlite_busy("report_outcome", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;

            let gate = OutcomeTxOps::finish_task(
                &mut tx,
                broadcast_id,
                recipient_id,
                status,
                platform_message_id,
                error,
            )
            .await?;

            if gate == 0 {
                tx.rollback().await?;
                return Ok(OutcomeApplied::Duplicate);
            }

            self.count_and_commit(tx, broadcast_id, status).await
        })
        .await?;

        self.log_applied(broadcast_id, recipient_id, &applied);
        Ok(applied)
    }

    /// Record an enqueue failure as a FAILED outcome.
    ///
    /// No QUEUED row exists for this recipient, so the task is inserted
    /// directly in FAILED state; the insert's conflict clause is the dedup
    /// gate on this path.
    pub async fn report_enqueue_failure(
        &self,
        task: &NewDeliveryTask,
        error: &str,
    ) -> Result<OutcomeApplied> {
        let applied = retry_on_sqlite_busy("report_enqueue_failure", || async {
            let mut tx = begin_immediate(&self.write_pool).await?;

            let gate = OutcomeTxOps::insert_failed_task(&mut tx, task, error).await?;
            if gate == 0 {
                tx.rollback().await?;
                return Ok(OutcomeApplied::Duplicate);
            }

            self.count_and_commit(tx, &task.broadcast_id, TaskStatus::Failed)
                .await
        })
        .await?;

        self.log_applied(&task.broadcast_id, &task.recipient_id, &applied);
        Ok(applied)
    }

    async fn count_and_commit(
        &self,
        mut tx: ImmediateTransaction,
        broadcast_id: &str,
        status: TaskStatus,
    ) -> Result<OutcomeApplied> {
        let (sent_delta, failed_delta) = match status {
            TaskStatus::Sent => (1, 0),
            _ => (0, 1),
        };

        let counted =
            OutcomeTxOps::apply_to_broadcast(&mut tx, broadcast_id, sent_delta, failed_delta)
                .await?;
        if counted == 0 {
            tx.rollback().await?;
            return Ok(OutcomeApplied::Rejected);
        }

        let state = OutcomeTxOps::fetch_broadcast(&mut tx, broadcast_id).await?;
        tx.commit().await?;

        let status = BroadcastStatus::parse(&state.status)
            .ok_or_else(|| Error::Other(format!("unknown broadcast status '{}'", state.status)))?;

        Ok(OutcomeApplied::Counted(OutcomeSnapshot {
            broadcast_id: state.id,
            sent_count: state.sent_count,
            failed_count: state.failed_count,
            total_recipients: state.total_recipients,
            status,
        }))
    }

    fn log_applied(&self, broadcast_id: &str, recipient_id: &str, applied: &OutcomeApplied) {
        match applied {
            OutcomeApplied::Counted(snapshot) => {
                if snapshot.finalized() {
                    info!(
                        "Broadcast {} finalized as {} ({} sent, {} failed of {})",
                        broadcast_id,
                        snapshot.status,
                        snapshot.sent_count,
                        snapshot.failed_count,
                        snapshot.total_recipients
                    );
                } else {
                    debug!(
                        "Counted outcome for broadcast {} recipient {} ({}/{} reported)",
                        broadcast_id,
                        recipient_id,
                        snapshot.sent_count + snapshot.failed_count,
                        snapshot.total_recipients
                    );
                }
            }
            OutcomeApplied::Duplicate => {
                debug!(
                    "Ignoring duplicate outcome for broadcast {} recipient {}",
                    broadcast_id, recipient_id
                );
            }
            OutcomeApplied::Rejected => {
                warn!(
                    "Broadcast {} no longer accepts outcomes (recipient {})",
                    broadcast_id, recipient_id
                );
            }
        }
    }
}
