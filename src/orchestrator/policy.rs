//! Decides whether a resource needs fetching again.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::identity::Resource;
use crate::project::Project;
use crate::revision::RevisionError;

/// Freshness check run before every body fetch.
#[async_trait]
pub trait FreshnessPolicy: Send + Sync + Debug {
    /// Returns `true` when the resource's default revision can be reused.
    async fn is_up_to_date(
        &self,
        project: &Project,
        resource: &Resource,
    ) -> Result<bool, RevisionError>;
}

/// Any stored revision, error revisions included, counts as up to date.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyRevisionIsFresh;

#[async_trait]
impl FreshnessPolicy for AnyRevisionIsFresh {
    async fn is_up_to_date(
        &self,
        project: &Project,
        resource: &Resource,
    ) -> Result<bool, RevisionError> {
        project.has_any_revisions(resource).await
    }
}

/// Nothing is ever up to date; every download fetches.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRefetch;

#[async_trait]
impl FreshnessPolicy for AlwaysRefetch {
    async fn is_up_to_date(
        &self,
        _project: &Project,
        _resource: &Resource,
    ) -> Result<bool, RevisionError> {
        Ok(false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;
    use futures_util::{StreamExt, stream};

    use super::*;
    use crate::project::ProjectOptions;
    use crate::revision::{PersistedError, RevisionOutcome};

    #[tokio::test]
    async fn test_any_revision_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path(), ProjectOptions::default())
            .await
            .unwrap();
        let resource = project.resolve("https://example.com/").await.unwrap();

        assert!(!AnyRevisionIsFresh.is_up_to_date(&project, &resource).await.unwrap());

        project
            .record_revision(
                &resource,
                RevisionOutcome::Error(PersistedError::new("ConnectionFailure", "refused")),
            )
            .await
            .unwrap();

        assert!(AnyRevisionIsFresh.is_up_to_date(&project, &resource).await.unwrap());
    }

    #[tokio::test]
    async fn test_always_refetch() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path(), ProjectOptions::default())
            .await
            .unwrap();
        let resource = project.resolve("https://example.com/").await.unwrap();
        project
            .record_revision(
                &resource,
                RevisionOutcome::Response {
                    metadata: None,
                    body: stream::iter(vec![Ok(Bytes::from_static(b"x"))]).boxed(),
                },
            )
            .await
            .unwrap();

        assert!(!AlwaysRefetch.is_up_to_date(&project, &resource).await.unwrap());
    }
}
