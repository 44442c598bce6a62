//! Service container for dependency injection.
//!
//! The ServiceContainer holds references to all application services
//! and manages their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::adapter::DeliveryAdapter;
use crate::api::server::AppState;
use crate::database::repositories::{
    SqlxBroadcastRepository, SqlxDeliveryTaskRepository, SqlxRecipientRepository,
};
use crate::database::{DbPool, WritePool};
use crate::engine::{
    BroadcastCoordinator, DeliveryQueue, DeliveryWorkerConfig, DeliveryWorkerPool,
    QueueMaintenance, QueueMaintenanceConfig, RecipientResolver, RetryCoordinator,
    StatusAggregator,
};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Read pool.
    pub pool: DbPool,
    /// Serialized write pool for outcome transactions.
    pub write_pool: WritePool,
    /// Delivery adapter used by the worker pool.
    pub adapter: Arc<dyn DeliveryAdapter>,
    /// Delivery queue.
    pub queue: Arc<DeliveryQueue>,
    /// Outcome aggregator.
    pub aggregator: Arc<StatusAggregator>,
    /// Broadcast coordinator.
    pub coordinator: Arc<BroadcastCoordinator>,
    /// Retry coordinator.
    pub retry_coordinator: Arc<RetryCoordinator>,
    /// Delivery worker pool.
    pub worker_pool: Arc<DeliveryWorkerPool>,
    /// Queue maintenance service.
    pub maintenance: Arc<QueueMaintenance>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Create a new service container with the given pools and adapter.
    pub async fn new(
        pool: DbPool,
        write_pool: WritePool,
        adapter: Arc<dyn DeliveryAdapter>,
    ) -> Result<Self> {
        Self::with_config(
            pool,
            write_pool,
            adapter,
            DeliveryWorkerConfig::default(),
            QueueMaintenanceConfig::default(),
        )
        .await
    }

    /// Create a new service container with custom configuration.
    pub async fn with_config(
        pool: DbPool,
        write_pool: WritePool,
        adapter: Arc<dyn DeliveryAdapter>,
        worker_config: DeliveryWorkerConfig,
        maintenance_config: QueueMaintenanceConfig,
    ) -> Result<Self> {
        info!("Initializing service container");

        // Create repositories
        let broadcast_repo = Arc::new(SqlxBroadcastRepository::new(
            pool.clone(),
            write_pool.clone(),
        ));
        let task_repo = Arc::new(SqlxDeliveryTaskRepository::new(
            pool.clone(),
            write_pool.clone(),
        ));
        let recipient_repo = Arc::new(SqlxRecipientRepository::new(pool.clone()));

        // Create engine services
        let resolver = Arc::new(RecipientResolver::new(recipient_repo));
        let queue = Arc::new(DeliveryQueue::new(task_repo));
        let aggregator = Arc::new(StatusAggregator::new(write_pool.clone()));
        let coordinator = Arc::new(BroadcastCoordinator::new(
            broadcast_repo.clone(),
            resolver,
            queue.clone(),
            aggregator.clone(),
        ));
        let retry_coordinator = Arc::new(RetryCoordinator::new(broadcast_repo, coordinator.clone()));

        let worker_pool = Arc::new(DeliveryWorkerPool::with_config(worker_config));
        let maintenance = Arc::new(QueueMaintenance::new(maintenance_config, queue.clone()));

        let cancellation_token = CancellationToken::new();

        info!("Service container initialized");

        Ok(Self {
            pool,
            write_pool,
            adapter,
            queue,
            aggregator,
            coordinator,
            retry_coordinator,
            worker_pool,
            maintenance,
            cancellation_token,
        })
    }

    /// Initialize all services (recover queue state, start background tasks).
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing services");

        // Recover queue depth from tasks persisted before a restart
        let recovered = self.queue.recover().await?;
        info!("Recovered {} queued delivery tasks", recovered);

        self.worker_pool.start(
            self.queue.clone(),
            self.adapter.clone(),
            self.aggregator.clone(),
        );

        self.maintenance
            .start_background_task(self.cancellation_token.clone());

        info!("Services initialized");
        Ok(())
    }

    /// Build the API state backed by this container's services.
    pub fn app_state(&self) -> AppState {
        AppState::new()
            .with_coordinator(self.coordinator.clone())
            .with_retry_coordinator(self.retry_coordinator.clone())
            .with_queue(self.queue.clone())
            .with_pool(self.pool.clone())
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        // Signal all background tasks to stop
        self.cancellation_token.cancel();

        // Drain in-flight deliveries
        info!("Stopping delivery worker pool...");
        let stop_result = tokio::time::timeout(timeout, self.worker_pool.stop()).await;
        if stop_result.is_err() {
            tracing::warn!("Worker pool did not stop within {:?}", timeout);
        }

        // Close database pools
        info!("Closing database pools...");
        self.write_pool.close().await;
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
