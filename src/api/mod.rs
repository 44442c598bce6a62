//! REST API server module.
//!
//! Provides HTTP endpoints for creating broadcasts, tracking their delivery
//! progress, and cancelling or retrying them.

pub mod error;
pub mod routes;
pub mod server;

pub use server::ApiServer;
