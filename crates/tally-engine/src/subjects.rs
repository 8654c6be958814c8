//! The subject-profile port.
//!
//! Grouping history by a subject attribute (department, study programme)
//! needs a read-only dimension lookup against the member directory. The
//! engine only ever issues one batched lookup per query -- never one call
//! per subject -- and has no write path back into the directory.

use std::collections::HashMap;

use async_trait::async_trait;
use tally_types::SubjectId;

use crate::store::StoreError;

/// Read-only, batched subject attribute resolution.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// Resolve one named attribute for a batch of subjects.
    ///
    /// Subjects the directory does not know are simply absent from the
    /// returned map; the caller decides what absence means (the history
    /// aggregator excludes them from attribute-based groups).
    async fn resolve_attribute(
        &self,
        subject_ids: &[SubjectId],
        attribute: &str,
    ) -> Result<HashMap<SubjectId, String>, StoreError>;
}

/// A directory that knows nothing.
///
/// Useful for queries that never group by subject attribute.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDirectory;

#[async_trait]
impl SubjectDirectory for NullDirectory {
    async fn resolve_attribute(
        &self,
        _subject_ids: &[SubjectId],
        _attribute: &str,
    ) -> Result<HashMap<SubjectId, String>, StoreError> {
        Ok(HashMap::new())
    }
}

/// A map-backed directory for tests and small embeddings.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    profiles: HashMap<SubjectId, HashMap<String, String>>,
}

impl StaticDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one attribute value for a subject.
    #[must_use]
    pub fn with_attribute(
        mut self,
        subject_id: impl Into<SubjectId>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.profiles
            .entry(subject_id.into())
            .or_default()
            .insert(attribute.into(), value.into());
        self
    }
}

#[async_trait]
impl SubjectDirectory for StaticDirectory {
    async fn resolve_attribute(
        &self,
        subject_ids: &[SubjectId],
        attribute: &str,
    ) -> Result<HashMap<SubjectId, String>, StoreError> {
        let mut resolved = HashMap::new();
        for subject_id in subject_ids {
            if let Some(value) = self
                .profiles
                .get(subject_id)
                .and_then(|attributes| attributes.get(attribute))
            {
                resolved.insert(subject_id.clone(), value.clone());
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_directory_resolves_known_subjects_only() {
        let directory = StaticDirectory::new()
            .with_attribute("alice", "department", "engineering")
            .with_attribute("bob", "department", "design");

        let resolved = directory
            .resolve_attribute(
                &[
                    SubjectId::new("alice"),
                    SubjectId::new("bob"),
                    SubjectId::new("stranger"),
                ],
                "department",
            )
            .await;

        let resolved = resolved.unwrap_or_default();
        assert_eq!(resolved.len(), 2);
        assert_eq!(
            resolved.get(&SubjectId::new("alice")).map(String::as_str),
            Some("engineering")
        );
        assert_eq!(resolved.get(&SubjectId::new("stranger")), None);
    }

    #[tokio::test]
    async fn null_directory_resolves_nothing() {
        let resolved = NullDirectory
            .resolve_attribute(&[SubjectId::new("alice")], "department")
            .await;
        assert_eq!(resolved.map(|m| m.len()).ok(), Some(0));
    }
}
