//! Delivery worker pool.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregator::StatusAggregator;
use super::queue::DeliveryQueue;
use crate::adapter::{DeliveryAdapter, DeliveryError};
use crate::database::models::DeliveryTaskDbModel;
use crate::domain::DeliveryOutcome;

/// Configuration for the delivery worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryWorkerConfig {
    /// Maximum concurrent deliveries.
    pub max_workers: usize,
    /// Per-send timeout in seconds.
    ///
    /// A send that exceeds this becomes a Failed outcome; there is no
    /// per-delivery retry.
    pub send_timeout_secs: u64,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for DeliveryWorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            send_timeout_secs: 15,
            poll_interval_ms: 100,
        }
    }
}

impl DeliveryWorkerConfig {
    /// Load worker config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `MAX_DELIVERY_WORKERS` (e.g. "8")
    /// - `DELIVERY_SEND_TIMEOUT_SECS` (e.g. "30")
    /// - `DELIVERY_POLL_INTERVAL_MS` (e.g. "250")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(workers) = std::env::var("MAX_DELIVERY_WORKERS")
            && let Ok(parsed) = workers.parse::<usize>()
            && parsed > 0
        {
            config.max_workers = parsed;
        }

        if let Ok(timeout) = std::env::var("DELIVERY_SEND_TIMEOUT_SECS")
            && let Ok(parsed) = timeout.parse::<u64>()
            && parsed > 0
        {
            config.send_timeout_secs = parsed;
        }

        if let Ok(interval) = std::env::var("DELIVERY_POLL_INTERVAL_MS")
            && let Ok(parsed) = interval.parse::<u64>()
            && parsed > 0
        {
            config.poll_interval_ms = parsed;
        }

        config
    }
}

/// A pool of workers draining the delivery queue.
pub struct DeliveryWorkerPool {
    /// Configuration.
    config: DeliveryWorkerConfig,
    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,
    /// Cancellation token.
    cancellation_token: CancellationToken,
    /// Task set for workers.
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl DeliveryWorkerPool {
    /// Create a new worker pool.
    pub fn new() -> Self {
        Self::with_config(DeliveryWorkerConfig::default())
    }

    /// Create a new worker pool with custom configuration.
    pub fn with_config(config: DeliveryWorkerConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_workers)),
            config,
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Start the worker pool.
    pub fn start(
        &self,
        queue: Arc<DeliveryQueue>,
        adapter: Arc<dyn DeliveryAdapter>,
        aggregator: Arc<StatusAggregator>,
    ) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let send_timeout = Duration::from_secs(self.config.send_timeout_secs);

        info!(
            "Starting delivery worker pool with {} max workers ({} adapter)",
            self.config.max_workers,
            adapter.adapter_type()
        );

        let mut tasks = self.tasks.lock();
        if let Some(ref mut join_set) = *tasks {
            for i in 0..self.config.max_workers {
                let semaphore = self.semaphore.clone();
                let cancellation_token = self.cancellation_token.clone();
                let queue = queue.clone();
                let adapter = adapter.clone();
                let aggregator = aggregator.clone();
                let notifier = queue.notifier();

                join_set.spawn(async move {
                    debug!("Delivery worker {} started", i);

                    loop {
                        if cancellation_token.is_cancelled() {
                            debug!("Delivery worker {} shutting down", i);
                            break;
                        }

                        // Wait for a task or timeout
                        tokio::select! {
                            _ = cancellation_token.cancelled() => {
                                break;
                            }
                            _ = notifier.notified() => {
                                // New task available
                            }
                            _ = tokio::time::sleep(poll_interval) => {
                                // Poll timeout
                            }
                        }

                        let permit = match semaphore.clone().try_acquire_owned() {
                            Ok(p) => p,
                            Err(_) => continue, // No permits available
                        };

                        let task = match queue.dequeue().await {
                            Ok(Some(task)) => task,
                            Ok(None) => {
                                drop(permit);
                                continue;
                            }
                            Err(e) => {
                                error!("Error claiming delivery task: {}", e);
                                drop(permit);
                                continue;
                            }
                        };

                        debug!(
                            "Delivery worker {} sending broadcast {} to recipient {} (attempt {})",
                            i, task.broadcast_id, task.recipient_id, task.attempts
                        );

                        let outcome = deliver(&task, adapter.as_ref(), send_timeout).await;

                        if let Err(e) = aggregator
                            .report(&task.broadcast_id, &task.recipient_id, &outcome)
                            .await
                        {
                            error!(
                                "Failed to record outcome for broadcast {} recipient {}: {}",
                                task.broadcast_id, task.recipient_id, e
                            );
                        }

                        drop(permit);
                    }
                });
            }
        }
    }

    /// Stop the worker pool.
    pub async fn stop(&self) {
        info!("Stopping delivery worker pool");
        self.cancellation_token.cancel();

        // Take the join set out of the mutex before awaiting
        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        // Wait for all workers to finish (outside the lock)
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Delivery worker pool stopped");
    }

    /// Check if the pool is running.
    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

impl Default for DeliveryWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one delivery attempt against the adapter.
///
/// Every failure mode, timeout included, collapses to a Failed outcome with
/// the reason preserved for the task's audit columns.
async fn deliver(
    task: &DeliveryTaskDbModel,
    adapter: &dyn DeliveryAdapter,
    send_timeout: Duration,
) -> DeliveryOutcome {
    let content = match task.parse_content() {
        Ok(content) => content,
        Err(e) => return DeliveryOutcome::failed(format!("invalid content snapshot: {e}")),
    };
    let recipient = task.recipient();

    match tokio::time::timeout(send_timeout, adapter.send(&recipient, &content)).await {
        Ok(Ok(message_id)) => DeliveryOutcome::Sent {
            platform_message_id: message_id,
        },
        Ok(Err(err)) => {
            warn!(
                "Delivery to recipient {} failed: {} (broadcast {})",
                recipient.id, err, task.broadcast_id
            );
            DeliveryOutcome::failed(err.to_string())
        }
        Err(_) => {
            warn!(
                "Delivery to recipient {} timed out after {}s (broadcast {})",
                recipient.id,
                send_timeout.as_secs(),
                task.broadcast_id
            );
            DeliveryOutcome::failed(DeliveryError::Timeout(send_timeout.as_secs()).to_string())
        }
    }
}
