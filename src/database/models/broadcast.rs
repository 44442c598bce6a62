//! Broadcast database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::parse_rfc3339;
use crate::domain::{BroadcastRecord, BroadcastStatus, MessageContent, TargetSelector};
use crate::{Error, Result};

/// Broadcast database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct BroadcastDbModel {
    pub id: String,
    /// JSON blob of the message content
    pub content: String,
    /// JSON blob of the target selector
    pub target_selector: String,
    pub total_recipients: i64,
    pub sent_count: i64,
    pub failed_count: i64,
    /// Status: PENDING, COMPLETED, COMPLETED_WITH_ERRORS, FAILED, CANCELLED
    pub status: String,
    pub retry_of: Option<String>,
    /// ISO 8601 timestamp when the broadcast was created
    pub created_at: String,
    /// ISO 8601 timestamp when the broadcast reached a terminal status
    pub finalized_at: Option<String>,
}

impl BroadcastDbModel {
    /// Build the row for a new domain record (serializes the JSON columns).
    pub fn from_record(record: &BroadcastRecord) -> Result<Self> {
        Ok(Self {
            id: record.id.clone(),
            content: serde_json::to_string(&record.content)?,
            target_selector: serde_json::to_string(&record.target_selector)?,
            total_recipients: record.total_recipients,
            sent_count: record.sent_count,
            failed_count: record.failed_count,
            status: record.status.as_str().to_string(),
            retry_of: record.retry_of.clone(),
            created_at: record.created_at.to_rfc3339(),
            finalized_at: record.finalized_at.map(|dt| dt.to_rfc3339()),
        })
    }

    /// Convert a row back into the domain record.
    pub fn into_record(self) -> Result<BroadcastRecord> {
        let content: MessageContent = serde_json::from_str(&self.content)?;
        let target_selector: TargetSelector = serde_json::from_str(&self.target_selector)?;
        let status = BroadcastStatus::parse(&self.status)
            .ok_or_else(|| Error::Other(format!("unknown broadcast status '{}'", self.status)))?;
        let created_at = parse_rfc3339(&self.created_at)
            .ok_or_else(|| Error::Other(format!("bad created_at '{}'", self.created_at)))?;
        let finalized_at = match &self.finalized_at {
            Some(s) => Some(
                parse_rfc3339(s).ok_or_else(|| Error::Other(format!("bad finalized_at '{}'", s)))?,
            ),
            None => None,
        };

        Ok(BroadcastRecord {
            id: self.id,
            content,
            target_selector,
            total_recipients: self.total_recipients,
            sent_count: self.sent_count,
            failed_count: self.failed_count,
            status,
            retry_of: self.retry_of,
            created_at,
            finalized_at,
        })
    }
}

/// Aggregate stats projection summed over all broadcast rows.
#[derive(Debug, Clone, Copy, PartialEq, FromRow, Serialize, Deserialize)]
pub struct BroadcastStats {
    pub total_broadcasts: i64,
    pub total_sent: i64,
    pub total_failed: i64,
}

impl BroadcastStats {
    /// Success rate over counted outcomes, in `[0.0, 1.0]`.
    pub fn success_rate(&self) -> f64 {
        let counted = self.total_sent + self.total_failed;
        if counted == 0 {
            return 0.0;
        }
        self.total_sent as f64 / counted as f64
    }
}
