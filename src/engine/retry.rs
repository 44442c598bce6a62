//! Retry of failed broadcasts.

use std::sync::Arc;

use tracing::info;

use super::coordinator::BroadcastCoordinator;
use crate::database::repositories::BroadcastRepository;
use crate::domain::{BroadcastRecord, BroadcastStatus};
use crate::{Error, Result};

/// Re-runs a FAILED broadcast as a brand-new record.
///
/// The source record is never mutated; the new record links back through
/// `retry_of` and resolves its recipient set fresh, so directory changes
/// since the original attempt are picked up.
pub struct RetryCoordinator {
    broadcast_repo: Arc<dyn BroadcastRepository>,
    coordinator: Arc<BroadcastCoordinator>,
}

impl RetryCoordinator {
    pub fn new(
        broadcast_repo: Arc<dyn BroadcastRepository>,
        coordinator: Arc<BroadcastCoordinator>,
    ) -> Self {
        Self {
            broadcast_repo,
            coordinator,
        }
    }

    /// Retry a failed broadcast. Fails with `RetryNotAllowed` for any other
    /// source status.
    pub async fn retry(&self, id: &str) -> Result<BroadcastRecord> {
        let source = self.broadcast_repo.get_broadcast(id).await?;

        if source.status != BroadcastStatus::Failed {
            return Err(Error::RetryNotAllowed {
                id: id.to_string(),
                status: source.status.to_string(),
            });
        }

        let record = BroadcastRecord::new(source.content.clone(), source.target_selector.clone())
            .with_retry_of(&source.id);

        info!("Retrying broadcast {} as {}", source.id, record.id);

        self.coordinator.run_fanout(record).await
    }
}
