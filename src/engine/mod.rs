//! Broadcast fan-out engine.
//!
//! The engine is responsible for:
//! - Resolving target selectors into concrete recipient sets
//! - Fanning a broadcast out into per-recipient delivery tasks
//! - Running the delivery worker pool against the task queue
//! - Counting outcomes exactly once and deriving the terminal status
//! - Retrying failed broadcasts as fresh records
//! - Queue maintenance (lease recovery, pruning of old tasks)

mod aggregator;
mod coordinator;
mod maintenance;
mod queue;
mod resolver;
mod retry;
mod worker;

pub use aggregator::{OutcomeApplied, OutcomeSnapshot, StatusAggregator};
pub use coordinator::BroadcastCoordinator;
pub use maintenance::{QueueMaintenance, QueueMaintenanceConfig};
pub use queue::DeliveryQueue;
pub use resolver::RecipientResolver;
pub use retry::RetryCoordinator;
pub use worker::{DeliveryWorkerConfig, DeliveryWorkerPool};
