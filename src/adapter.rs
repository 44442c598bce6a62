//! Delivery adapter boundary.
//!
//! The engine never talks to the messaging platform directly; it hands each
//! delivery to a [`DeliveryAdapter`]. Platform clients (HTTP, rate limiting,
//! payload formatting) live behind this trait and outside this crate.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::domain::{MessageContent, PlatformMessageId, Recipient};

/// Typed failure of one delivery attempt.
///
/// Every variant collapses to a failed outcome for counting; the variant and
/// message are preserved on the task row for audit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("network error: {0}")]
    Network(String),

    #[error("send timed out after {0}s")]
    Timeout(u64),

    #[error("rate limited by platform: {0}")]
    RateLimited(String),

    #[error("recipient unreachable: {0}")]
    RecipientUnreachable(String),

    #[error("platform rejected message: {0}")]
    PlatformRejected(String),
}

/// Sends one message to one recipient on the external platform.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    /// Short name for logging and audit.
    fn adapter_type(&self) -> &'static str;

    /// Deliver `content` to `recipient`.
    ///
    /// Implementations own platform-specific formatting, including the
    /// keyboard layout and image reference. They must not retry internally;
    /// retry is a whole-broadcast decision made above this boundary.
    async fn send(
        &self,
        recipient: &Recipient,
        content: &MessageContent,
    ) -> Result<PlatformMessageId, DeliveryError>;
}

/// Per-recipient text lookup injected into an adapter's formatting step.
///
/// Adapters that localize button labels or templated text resolve keys
/// through this collaborator; the engine itself never calls it.
pub trait Translator: Send + Sync {
    fn resolve(&self, recipient: &Recipient, key: &str) -> String;
}

/// Adapter that logs every send and reports success.
///
/// Wired by the binary when no platform client is configured, so the full
/// fan-out path can run locally against the directory without reaching any
/// external service.
#[derive(Debug, Default)]
pub struct LogDeliveryAdapter;

#[async_trait]
impl DeliveryAdapter for LogDeliveryAdapter {
    fn adapter_type(&self) -> &'static str {
        "log"
    }

    async fn send(
        &self,
        recipient: &Recipient,
        content: &MessageContent,
    ) -> Result<PlatformMessageId, DeliveryError> {
        info!(
            recipient_id = %recipient.id,
            address = %recipient.address,
            text_len = content.text.len(),
            has_image = content.image_ref.is_some(),
            has_keyboard = content.keyboard.is_some(),
            "delivery (log adapter)"
        );
        Ok(PlatformMessageId(format!("log-{}", uuid::Uuid::new_v4())))
    }
}
