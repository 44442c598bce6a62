//! Queue maintenance for lease recovery and task retention.
//!
//! Two periodic jobs run against the delivery queue: a lease sweep that
//! returns abandoned IN_FLIGHT tasks to QUEUED, and a prune that deletes
//! terminal tasks older than the retention window.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::DeliveryQueue;
use crate::Result;
use crate::database::time::now_ms;

/// Configuration for queue maintenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMaintenanceConfig {
    /// Seconds an IN_FLIGHT task may hold its claim before the sweep
    /// returns it to the queue.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Interval between lease sweeps in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Hours to retain finished (SENT/FAILED) tasks.
    /// Set to 0 to retain all tasks indefinitely.
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

fn default_lease_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_retention_hours() -> u64 {
    24
}

impl Default for QueueMaintenanceConfig {
    fn default() -> Self {
        Self {
            lease_secs: default_lease_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            retention_hours: default_retention_hours(),
        }
    }
}

impl QueueMaintenanceConfig {
    /// Create a new QueueMaintenanceConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lease duration in seconds.
    pub fn with_lease_secs(mut self, secs: u64) -> Self {
        self.lease_secs = secs;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Set the retention window in hours.
    pub fn with_retention_hours(mut self, hours: u64) -> Self {
        self.retention_hours = hours;
        self
    }

    /// Load maintenance config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `TASK_LEASE_SECS` (e.g. "120")
    /// - `TASK_SWEEP_INTERVAL_SECS` (e.g. "15")
    /// - `TASK_RETENTION_HOURS` (e.g. "72", "0" keeps finished tasks forever)
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(lease) = std::env::var("TASK_LEASE_SECS")
            && let Ok(parsed) = lease.parse::<u64>()
            && parsed > 0
        {
            config.lease_secs = parsed;
        }

        if let Ok(interval) = std::env::var("TASK_SWEEP_INTERVAL_SECS")
            && let Ok(parsed) = interval.parse::<u64>()
            && parsed > 0
        {
            config.sweep_interval_secs = parsed;
        }

        if let Ok(retention) = std::env::var("TASK_RETENTION_HOURS")
            && let Ok(parsed) = retention.parse::<u64>()
        {
            config.retention_hours = parsed;
        }

        config
    }
}

/// Interval between prune runs; pruning is far less urgent than the sweep.
const PRUNE_INTERVAL_SECS: u64 = 3600;

/// Background maintenance over the delivery queue.
pub struct QueueMaintenance {
    config: QueueMaintenanceConfig,
    queue: Arc<DeliveryQueue>,
}

impl QueueMaintenance {
    /// Create a new QueueMaintenance service.
    pub fn new(config: QueueMaintenanceConfig, queue: Arc<DeliveryQueue>) -> Self {
        Self { config, queue }
    }

    /// Run a single lease sweep.
    /// Returns the number of tasks returned to the queue.
    pub async fn run_sweep(&self) -> Result<u64> {
        let cutoff = now_ms() - (self.config.lease_secs as i64) * 1000;
        let requeued = self.queue.requeue_expired(cutoff).await?;

        if requeued > 0 {
            warn!(
                "Requeued {} delivery tasks with expired leases (lease: {}s)",
                requeued, self.config.lease_secs
            );
        } else {
            debug!("No expired delivery leases");
        }

        Ok(requeued)
    }

    /// Run a single retention prune.
    /// Returns the number of finished tasks deleted.
    pub async fn run_prune(&self) -> Result<u64> {
        // Retention 0 means keep finished tasks forever
        if self.config.retention_hours == 0 {
            debug!("Task pruning disabled (retention_hours = 0)");
            return Ok(0);
        }

        let cutoff = now_ms() - (self.config.retention_hours as i64) * 3_600_000;
        let deleted = self.queue.prune_finished_before(cutoff).await?;

        if deleted > 0 {
            info!(
                "Pruned {} finished delivery tasks (retention: {}h)",
                deleted, self.config.retention_hours
            );
        } else {
            debug!("No finished delivery tasks to prune");
        }

        Ok(deleted)
    }

    /// Start the background maintenance task.
    pub fn start_background_task(&self, cancellation_token: CancellationToken) {
        let config = self.config.clone();
        let queue = self.queue.clone();

        tokio::spawn(async move {
            let service = QueueMaintenance {
                config: config.clone(),
                queue,
            };

            let mut sweep_interval = interval(Duration::from_secs(config.sweep_interval_secs));
            let mut prune_interval = interval(Duration::from_secs(PRUNE_INTERVAL_SECS));

            info!(
                "Queue maintenance started (lease: {}s, sweep: {}s, retention: {}h)",
                config.lease_secs, config.sweep_interval_secs, config.retention_hours
            );

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Queue maintenance shutting down");
                        break;
                    }
                    _ = sweep_interval.tick() => {
                        if let Err(e) = service.run_sweep().await {
                            error!("Lease sweep failed: {}", e);
                        }
                    }
                    _ = prune_interval.tick() => {
                        if let Err(e) = service.run_prune().await {
                            error!("Task prune failed: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Get the current configuration.
    pub fn config(&self) -> &QueueMaintenanceConfig {
        &self.config
    }
}
