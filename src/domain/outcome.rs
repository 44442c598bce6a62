//! Delivery task states and per-delivery outcomes.

use serde::{Deserialize, Serialize};

use super::PlatformMessageId;

/// Delivery task queue states.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the queue for a worker.
    Queued,
    /// Claimed by a worker; the lease expires if the worker dies.
    InFlight,
    /// Outcome counted as a success.
    Sent,
    /// Outcome counted as a failure.
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::InFlight => "IN_FLIGHT",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "IN_FLIGHT" => Some(Self::InFlight),
            "SENT" => Some(Self::Sent),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    ///
    /// A task row's transition into a terminal status is the dedup marker
    /// for outcome counting; it happens at most once per row.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// The result of one delivery attempt, as reported to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent {
        platform_message_id: PlatformMessageId,
    },
    Failed {
        /// Audit-only failure reason, preserved on the task row.
        reason: String,
    },
}

impl DeliveryOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }

    /// Terminal task status this outcome maps to.
    pub fn task_status(&self) -> TaskStatus {
        match self {
            Self::Sent { .. } => TaskStatus::Sent,
            Self::Failed { .. } => TaskStatus::Failed,
        }
    }
}
