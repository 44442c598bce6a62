//! Target-set selectors.

use serde::{Deserialize, Serialize};

/// Which recipients a broadcast addresses.
///
/// Resolved exactly once, at creation time, against the directory snapshot;
/// the resolved list is not persisted, only its size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetSelector {
    /// Every recipient the directory knows.
    All,
    /// Recipients the directory currently flags active.
    ActiveOnly,
    /// Recipients last seen within the given number of days.
    RecentlyActive { within_days: u32 },
    /// An explicit set of recipient ids.
    ExplicitIds { ids: Vec<String> },
}

impl TargetSelector {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::ActiveOnly => "active_only",
            Self::RecentlyActive { .. } => "recently_active",
            Self::ExplicitIds { .. } => "explicit_ids",
        }
    }
}
