//! Recipient value objects.

use serde::{Deserialize, Serialize};

/// One deliverable endpoint: an end user, group, or channel.
///
/// The engine only needs this capability set; which platform kind the
/// recipient is lives entirely in the directory and adapter implementations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    /// Platform delivery address (chat id, channel handle, ...).
    pub address: String,
    pub is_active: bool,
}

impl Recipient {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Message id assigned by the platform on successful delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformMessageId(pub String);

impl PlatformMessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PlatformMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
