//! Delivery task database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{MessageContent, Recipient, TaskStatus};
use crate::{Error, Result};

/// Delivery task queue row.
///
/// One row per (broadcast, recipient); the UNIQUE constraint on that pair is
/// the stable task identity the counting dedup relies on.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryTaskDbModel {
    pub id: i64,
    pub broadcast_id: String,
    pub recipient_id: String,
    pub address: String,
    /// JSON blob of the content snapshot taken at enqueue time
    pub content: String,
    /// Status: QUEUED, IN_FLIGHT, SENT, FAILED
    pub status: String,
    pub attempts: i64,
    pub platform_message_id: Option<String>,
    pub last_error: Option<String>,
    /// Unix epoch milliseconds (UTC)
    pub created_at: i64,
    pub claimed_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl DeliveryTaskDbModel {
    pub fn task_status(&self) -> Result<TaskStatus> {
        TaskStatus::parse(&self.status)
            .ok_or_else(|| Error::Other(format!("unknown task status '{}'", self.status)))
    }

    pub fn parse_content(&self) -> Result<MessageContent> {
        Ok(serde_json::from_str(&self.content)?)
    }

    /// Recipient view reconstructed from the row.
    ///
    /// Activity is snapshotted as live at enqueue time; a recipient that
    /// deactivates mid-broadcast still receives its task.
    pub fn recipient(&self) -> Recipient {
        Recipient::new(self.recipient_id.clone(), self.address.clone())
    }
}

/// A new task about to be enqueued (columns the INSERT provides).
#[derive(Debug, Clone)]
pub struct NewDeliveryTask {
    pub broadcast_id: String,
    pub recipient_id: String,
    pub address: String,
    pub content: String,
}

impl NewDeliveryTask {
    pub fn new(broadcast_id: &str, recipient: &Recipient, content_json: &str) -> Self {
        Self {
            broadcast_id: broadcast_id.to_string(),
            recipient_id: recipient.id.clone(),
            address: recipient.address.clone(),
            content: content_json.to_string(),
        }
    }
}
