//! Repository layer for database access.
//!
//! This module implements the Repository Pattern to abstract all database interactions,
//! creating a clean and maintainable data access layer.

pub mod broadcast;
pub mod delivery_task;
pub mod outcome_tx;
pub mod recipient;

pub use broadcast::*;
pub use delivery_task::*;
pub use outcome_tx::*;
pub use recipient::*;
