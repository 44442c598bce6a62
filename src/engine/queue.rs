//! Delivery task queue service.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::info;

use crate::database::models::{DeliveryTaskDbModel, NewDeliveryTask};
use crate::database::repositories::DeliveryTaskRepository;
use crate::Result;

/// Database-backed delivery queue.
///
/// Persistence lives in the repository; this service adds the in-process
/// signal path (depth counter + notify) that lets workers sleep between
/// tasks instead of hammering the database.
pub struct DeliveryQueue {
    repository: Arc<dyn DeliveryTaskRepository>,
    /// Current queue depth (approximate).
    depth: AtomicUsize,
    /// Notify when new tasks are added.
    notify: Arc<Notify>,
}

impl DeliveryQueue {
    pub fn new(repository: Arc<dyn DeliveryTaskRepository>) -> Self {
        Self {
            repository,
            depth: AtomicUsize::new(0),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Load the queued-task count from the database on startup.
    ///
    /// Tasks enqueued before a restart are still in the table; the depth
    /// counter and the worker wakeup have to reflect them.
    pub async fn recover(&self) -> Result<usize> {
        let queued = self.repository.count_queued().await?;
        self.depth.store(queued as usize, Ordering::SeqCst);

        if queued > 0 {
            info!("Recovered {} queued delivery tasks", queued);
            self.notify.notify_one();
        }

        Ok(queued as usize)
    }

    /// Enqueue a new task and wake a worker.
    pub async fn enqueue(&self, task: &NewDeliveryTask) -> Result<()> {
        self.repository.enqueue(task).await?;
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
        Ok(())
    }

    /// Claim the next task for processing.
    pub async fn dequeue(&self) -> Result<Option<DeliveryTaskDbModel>> {
        let claimed = self.repository.claim_next().await?;
        if claimed.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(claimed)
    }

    /// Return expired IN_FLIGHT tasks to the queue.
    pub async fn requeue_expired(&self, cutoff_ms: i64) -> Result<u64> {
        let requeued = self.repository.requeue_expired(cutoff_ms).await?;
        if requeued > 0 {
            self.depth.fetch_add(requeued as usize, Ordering::SeqCst);
            self.notify.notify_one();
        }
        Ok(requeued)
    }

    /// Delete terminal tasks finished before the cutoff.
    pub async fn prune_finished_before(&self, cutoff_ms: i64) -> Result<u64> {
        self.repository.prune_finished_before(cutoff_ms).await
    }

    /// Get the notifier workers wait on.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Approximate number of queued tasks.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}
