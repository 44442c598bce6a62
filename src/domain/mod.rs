//! Domain layer for fanout.
//!
//! This module contains the core entities and value objects of the
//! broadcast engine.

pub mod broadcast;
pub mod content;
pub mod outcome;
pub mod recipient;
pub mod selector;

pub use broadcast::{BroadcastRecord, BroadcastStatus};
pub use content::{ButtonAction, KeyboardButton, MessageContent};
pub use outcome::{DeliveryOutcome, TaskStatus};
pub use recipient::{PlatformMessageId, Recipient};
pub use selector::TargetSelector;
