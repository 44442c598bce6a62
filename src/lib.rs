//! Broadcast fan-out and delivery-tracking engine.
//!
//! One broadcast request fans out into per-recipient delivery tasks worked
//! off a persistent queue; outcomes are counted exactly once back onto the
//! broadcast, which finalizes itself when the last outcome lands.

pub mod adapter;
pub mod api;
pub mod database;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod services;

pub use error::{Error, Result};
