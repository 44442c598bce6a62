//! Database models for fanout.
//!
//! These models map directly to the database schema and handle
//! serialization/deserialization of JSON fields.

pub mod broadcast;
pub mod delivery_task;

pub use broadcast::*;
pub use delivery_task::*;
