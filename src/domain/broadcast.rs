//! Broadcast record entity and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageContent, TargetSelector};
use crate::Error;

/// Broadcast lifecycle statuses.
///
/// Only `Pending` accepts counter-driven finalization; every other status is
/// terminal. `Cancelled` still accepts raw counter increments from in-flight
/// deliveries but never transitions away.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastStatus {
    /// Deliveries are queued or running; counters below the total.
    Pending,
    /// All outcomes in, none failed.
    Completed,
    /// All outcomes in, some failed and some succeeded.
    CompletedWithErrors,
    /// All outcomes in and nothing succeeded, or nothing resolved to send.
    Failed,
    /// Cancelled by the operator while still pending.
    Cancelled,
}

impl BroadcastStatus {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::CompletedWithErrors => "COMPLETED_WITH_ERRORS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "COMPLETED" => Some(Self::Completed),
            "COMPLETED_WITH_ERRORS" => Some(Self::CompletedWithErrors),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Validate a status transition.
    pub fn can_transition_to(&self, target: BroadcastStatus) -> bool {
        match (self, target) {
            (from, to) if from == &to => true,
            (Self::Pending, _) => true,
            _ => false,
        }
    }

    /// Attempt to transition to a new status.
    pub fn transition_to(&self, target: BroadcastStatus) -> Result<BroadcastStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::Validation(format!(
                "cannot transition broadcast from {} to {}",
                self.as_str(),
                target.as_str()
            )))
        }
    }

    /// Derive the terminal status for a fully-counted broadcast.
    ///
    /// Matches the finalization clause the aggregator commits in SQL:
    /// no failures means completed, no successes means failed, a mix means
    /// completed with errors. A broadcast that resolved to zero recipients
    /// is failed (nothing was sent, nothing succeeded).
    pub fn derive_terminal(sent_count: i64, failed_count: i64, total_recipients: i64) -> Self {
        if total_recipients == 0 || sent_count == 0 {
            Self::Failed
        } else if failed_count == 0 {
            Self::Completed
        } else {
            Self::CompletedWithErrors
        }
    }
}

/// Durable record of one broadcast.
///
/// `total_recipients` is written once after resolution; `sent_count` and
/// `failed_count` are mutated only by the status aggregator's atomic update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub id: String,
    pub content: MessageContent,
    pub target_selector: TargetSelector,
    pub total_recipients: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    pub status: BroadcastStatus,
    /// Id of the failed broadcast this one was retried from, if any.
    pub retry_of: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl BroadcastRecord {
    /// Create a new pending broadcast with zeroed counters.
    pub fn new(content: MessageContent, target_selector: TargetSelector) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            target_selector,
            total_recipients: 0,
            sent_count: 0,
            failed_count: 0,
            status: BroadcastStatus::Pending,
            retry_of: None,
            created_at: Utc::now(),
            finalized_at: None,
        }
    }

    /// Mark this record as a retry of a failed broadcast.
    pub fn with_retry_of(mut self, source_id: impl Into<String>) -> Self {
        self.retry_of = Some(source_id.into());
        self
    }

    /// Number of outcomes still outstanding.
    pub fn remaining(&self) -> i64 {
        self.total_recipients - self.sent_count - self.failed_count
    }

    /// Check whether every resolved recipient has a counted outcome.
    pub fn is_fully_counted(&self) -> bool {
        self.sent_count + self.failed_count >= self.total_recipients
    }

    /// Success rate over counted outcomes, in `[0.0, 1.0]`.
    pub fn success_rate(&self) -> f64 {
        let counted = self.sent_count + self.failed_count;
        if counted == 0 {
            return 0.0;
        }
        self.sent_count as f64 / counted as f64
    }
}
