use std::sync::Arc;

use fanout::adapter::LogDeliveryAdapter;
use fanout::api::server::{ApiServer, ApiServerConfig};
use fanout::engine::{DeliveryWorkerConfig, QueueMaintenanceConfig};
use fanout::services::ServiceContainer;
use fanout::{database, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging; the guard must outlive the runtime
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _guard = logging::init_logging(&log_dir)?;

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:fanout.db?mode=rwc".to_string());

    let pool = database::init_pool(&database_url).await?;
    let write_pool = database::init_write_pool(&database_url).await?;

    // Run migrations
    database::run_migrations(&pool).await?;

    // Build and start services
    let container = ServiceContainer::with_config(
        pool,
        write_pool,
        Arc::new(LogDeliveryAdapter),
        DeliveryWorkerConfig::from_env_or_default(),
        QueueMaintenanceConfig::from_env_or_default(),
    )
    .await?;
    container.initialize().await?;

    logging::start_retention_cleanup(log_dir, container.cancellation_token());

    // Start the API server
    let server = ApiServer::with_state(ApiServerConfig::from_env_or_default(), container.app_state());
    let server_cancel = server.cancel_token();

    let server_handle = tokio::spawn(async move { server.run().await });

    tracing::info!("fanout initialized successfully");

    // Wait for ctrl-c, then shut everything down
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    server_cancel.cancel();
    container.shutdown().await?;

    match server_handle.await {
        Ok(result) => result?,
        Err(e) => tracing::warn!("API server task join error: {}", e),
    }

    Ok(())
}
