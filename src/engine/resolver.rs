//! Recipient resolution.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::database::repositories::RecipientRepository;
use crate::domain::{Recipient, TargetSelector};
use crate::{Error, Result};

/// Resolves a target selector into the concrete recipient set of a broadcast.
///
/// Whatever the selector semantics, the result never contains an inactive
/// recipient or a duplicate ID. Resolution happens once per broadcast at
/// creation time; later directory changes do not touch already-enqueued tasks.
pub struct RecipientResolver {
    directory: Arc<dyn RecipientRepository>,
}

impl RecipientResolver {
    pub fn new(directory: Arc<dyn RecipientRepository>) -> Self {
        Self { directory }
    }

    /// Resolve a selector. Directory failures surface as `Error::Resolution`.
    pub async fn resolve(&self, selector: &TargetSelector) -> Result<Vec<Recipient>> {
        let matched = self
            .directory
            .list_by_policy(selector)
            .await
            .map_err(|e| Error::resolution(format!("directory lookup failed: {e}")))?;

        let matched_count = matched.len();

        // BTreeMap dedups by ID and gives a stable order
        let mut unique: BTreeMap<String, Recipient> = BTreeMap::new();
        for recipient in matched {
            if !recipient.is_active {
                continue;
            }
            unique.entry(recipient.id.clone()).or_insert(recipient);
        }

        let recipients: Vec<Recipient> = unique.into_values().collect();

        debug!(
            selector = selector.kind(),
            matched = matched_count,
            resolved = recipients.len(),
            "Resolved recipient set"
        );

        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FakeDirectory {
        recipients: Vec<Recipient>,
        fail: bool,
    }

    #[async_trait]
    impl RecipientRepository for FakeDirectory {
        async fn list_by_policy(&self, _selector: &TargetSelector) -> Result<Vec<Recipient>> {
            if self.fail {
                return Err(Error::Other("directory offline".to_string()));
            }
            Ok(self.recipients.clone())
        }
    }

    #[tokio::test]
    async fn test_excludes_inactive_and_dedups() {
        let directory = FakeDirectory {
            recipients: vec![
                Recipient::new("r2", "chat-2"),
                Recipient::new("r1", "chat-1"),
                Recipient::new("r1", "chat-1-dup"),
                Recipient::new("r3", "chat-3").inactive(),
            ],
            fail: false,
        };
        let resolver = RecipientResolver::new(Arc::new(directory));

        let resolved = resolver.resolve(&TargetSelector::All).await.unwrap();

        let ids: Vec<&str> = resolved.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert_eq!(resolved[0].address, "chat-1");
    }

    #[tokio::test]
    async fn test_directory_failure_maps_to_resolution_error() {
        let directory = FakeDirectory {
            recipients: vec![],
            fail: true,
        };
        let resolver = RecipientResolver::new(Arc::new(directory));

        let err = resolver.resolve(&TargetSelector::All).await.unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
        assert!(err.to_string().contains("directory offline"));
    }

    #[tokio::test]
    async fn test_empty_directory_resolves_empty() {
        let directory = FakeDirectory {
            recipients: vec![],
            fail: false,
        };
        let resolver = RecipientResolver::new(Arc::new(directory));

        let resolved = resolver.resolve(&TargetSelector::ActiveOnly).await.unwrap();
        assert!(resolved.is_empty());
    }
}
