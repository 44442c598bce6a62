//! Message content carried by a broadcast.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum number of keyboard rows accepted on creation.
const MAX_KEYBOARD_ROWS: usize = 20;

/// Maximum number of buttons per keyboard row.
const MAX_BUTTONS_PER_ROW: usize = 8;

/// The message payload of a broadcast.
///
/// Platform-specific formatting (markup, image upload, keyboard encoding)
/// belongs to the delivery adapter; this type only carries the operator's
/// input unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub text: String,
    /// Opaque reference to an image held by the asset store, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    /// Ordered rows of labeled actions, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Vec<Vec<KeyboardButton>>>,
}

impl MessageContent {
    /// Create a plain-text message.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_ref: None,
            keyboard: None,
        }
    }

    /// Attach an image reference.
    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }

    /// Attach a keyboard layout.
    pub fn with_keyboard(mut self, rows: Vec<Vec<KeyboardButton>>) -> Self {
        self.keyboard = Some(rows);
        self
    }

    /// Validate operator input before a broadcast is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(Error::validation("message text must not be empty"));
        }

        if let Some(rows) = &self.keyboard {
            if rows.is_empty() {
                return Err(Error::validation("keyboard must contain at least one row"));
            }
            if rows.len() > MAX_KEYBOARD_ROWS {
                return Err(Error::validation(format!(
                    "keyboard exceeds {} rows",
                    MAX_KEYBOARD_ROWS
                )));
            }
            for row in rows {
                if row.is_empty() {
                    return Err(Error::validation("keyboard rows must not be empty"));
                }
                if row.len() > MAX_BUTTONS_PER_ROW {
                    return Err(Error::validation(format!(
                        "keyboard row exceeds {} buttons",
                        MAX_BUTTONS_PER_ROW
                    )));
                }
                for button in row {
                    button.validate()?;
                }
            }
        }

        Ok(())
    }
}

/// One labeled action on the keyboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyboardButton {
    pub label: String,
    #[serde(flatten)]
    pub action: ButtonAction,
}

impl KeyboardButton {
    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url { url: url.into() },
        }
    }

    pub fn callback(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback {
                token: token.into(),
            },
        }
    }

    fn validate(&self) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(Error::validation("button label must not be empty"));
        }
        match &self.action {
            ButtonAction::Url { url } if url.trim().is_empty() => {
                Err(Error::validation("button url must not be empty"))
            }
            ButtonAction::Callback { token } if token.trim().is_empty() => {
                Err(Error::validation("button callback token must not be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// What pressing a button does: open a URL or emit an opaque callback token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ButtonAction {
    Url { url: String },
    Callback { token: String },
}
