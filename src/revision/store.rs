//! Recording and reading revisions.
//!
//! Recording is a two-phase commit. The index row is inserted under the
//! project's writer lock, then the body is streamed to `revisions/<id>` with
//! the lock released. If the body cannot be stored, the row is deleted and the
//! failure is recorded as an error revision in its place.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::{PersistedError, ResourceRevision, RevisionError, RevisionMetadata, RevisionOutcome};
use crate::fetch::BodyStream;
use crate::identity::Resource;
use crate::project::{ModelError, Project};
use crate::store::RevisionRow;
use crate::types::RevisionId;

impl Project {
    /// Stores the outcome of a fetch attempt as a new revision.
    ///
    /// A body that fails mid-stream does not fail the call: the partial
    /// revision is rolled back and the failure is stored as an error revision,
    /// which is returned.
    ///
    /// # Errors
    ///
    /// Returns `RevisionError::Model` for foreign or deleted resources and
    /// `RevisionError::Db` if the index cannot be written.
    #[instrument(skip(self, resource, outcome), fields(resource_id = %resource.id(), url = %resource.url()))]
    pub async fn record_revision(
        &self,
        resource: &Resource,
        outcome: RevisionOutcome,
    ) -> Result<ResourceRevision, RevisionError> {
        self.ensure_owned(resource)?;

        let (metadata, body) = match outcome {
            RevisionOutcome::Error(error) => {
                return self.insert_revision(resource, Some(error), None, false).await;
            }
            RevisionOutcome::Response { metadata, body } => (metadata, body),
        };

        let revision = self.insert_revision(resource, None, metadata, true).await?;
        match write_body(&revision.body_path, body).await {
            Ok(bytes) => {
                let _state = self.lock_state().await;
                if !resource.accepts_revisions() {
                    // Deletion started while the body was written; its row is gone or going.
                    remove_body(&revision.body_path).await?;
                    return Err(ModelError::ResourceDeleted {
                        url: resource.url(),
                    }
                    .into());
                }
                debug!(revision_id = %revision.id, bytes, "revision body stored");
                Ok(revision)
            }
            Err(err) => {
                warn!(revision_id = %revision.id, error = %err, "body not stored, recording failure");
                {
                    let _state = self.lock_state().await;
                    self.inner.store.delete_revision(revision.id.get()).await?;
                }
                self.insert_revision(resource, Some(PersistedError::from(&err)), None, false)
                    .await
            }
        }
    }

    /// Lists a resource's revisions, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RevisionError::Decode` if a stored row is corrupt.
    pub async fn list_revisions(
        &self,
        resource: &Resource,
    ) -> Result<Vec<ResourceRevision>, RevisionError> {
        self.ensure_same_project(resource)?;
        let rows = self
            .inner
            .store
            .list_revisions(resource.id().get())
            .await?;
        let mut revisions = Vec::with_capacity(rows.len());
        for row in rows {
            revisions.push(self.revision_from_row(resource, row).await?);
        }
        Ok(revisions)
    }

    /// Returns the newest revision of a resource.
    ///
    /// # Errors
    ///
    /// Returns `RevisionError::Decode` if the stored row is corrupt.
    pub async fn default_revision(
        &self,
        resource: &Resource,
    ) -> Result<Option<ResourceRevision>, RevisionError> {
        self.ensure_same_project(resource)?;
        match self
            .inner
            .store
            .latest_revision(resource.id().get())
            .await?
        {
            Some(row) => Ok(Some(self.revision_from_row(resource, row).await?)),
            None => Ok(None),
        }
    }

    /// Returns whether a resource has any revision at all.
    ///
    /// # Errors
    ///
    /// Returns `RevisionError::Db` if the query fails.
    pub async fn has_any_revisions(&self, resource: &Resource) -> Result<bool, RevisionError> {
        self.ensure_same_project(resource)?;
        Ok(self
            .inner
            .store
            .has_revisions(resource.id().get())
            .await?)
    }

    /// Deletes a revision: body file first, then the index row.
    ///
    /// # Errors
    ///
    /// Returns `RevisionError::Io` if the body cannot be removed.
    #[instrument(skip(self, revision), fields(revision_id = %revision.id))]
    pub async fn delete_revision(&self, revision: &ResourceRevision) -> Result<(), RevisionError> {
        self.ensure_same_project(&revision.resource)?;
        remove_body(&revision.body_path).await?;
        let _state = self.lock_state().await;
        self.inner.store.delete_revision(revision.id.get()).await?;
        info!("revision deleted");
        Ok(())
    }

    pub(crate) fn body_path(&self, id: RevisionId) -> PathBuf {
        self.revisions_dir().join(id.to_string())
    }

    fn ensure_same_project(&self, resource: &Resource) -> Result<(), ModelError> {
        if resource.project_id() == self.id() {
            Ok(())
        } else {
            Err(ModelError::CrossProjectReference)
        }
    }

    async fn insert_revision(
        &self,
        resource: &Resource,
        error: Option<PersistedError>,
        metadata: Option<RevisionMetadata>,
        has_body: bool,
    ) -> Result<ResourceRevision, RevisionError> {
        let error_json = serde_json::to_string(&error).map_err(RevisionError::Encode)?;
        let metadata_json = serde_json::to_string(&metadata).map_err(RevisionError::Encode)?;

        let id = {
            let _state = self.lock_state().await;
            if !resource.accepts_revisions() {
                return Err(ModelError::ResourceDeleted {
                    url: resource.url(),
                }
                .into());
            }
            RevisionId(
                self.inner
                    .store
                    .insert_revision(resource.id().get(), &error_json, &metadata_json)
                    .await?,
            )
        };

        Ok(ResourceRevision {
            id,
            resource: resource.clone(),
            error,
            metadata,
            has_body,
            body_path: self.body_path(id),
        })
    }

    async fn revision_from_row(
        &self,
        resource: &Resource,
        row: RevisionRow,
    ) -> Result<ResourceRevision, RevisionError> {
        let id = RevisionId(row.id);
        let error = decode_column(id, "error", row.error.as_deref())?;
        let metadata = decode_column(id, "metadata", row.metadata.as_deref())?;
        let body_path = self.body_path(id);
        let has_body = tokio::fs::try_exists(&body_path)
            .await
            .map_err(|e| RevisionError::io(&body_path, e))?;

        Ok(ResourceRevision {
            id,
            resource: resource.clone(),
            error,
            metadata,
            has_body,
            body_path,
        })
    }
}

impl ResourceRevision {
    /// Opens the body file for reading.
    ///
    /// # Errors
    ///
    /// Returns `RevisionError::NoBody` if the revision has no body.
    pub async fn open_body(&self) -> Result<File, RevisionError> {
        if !self.has_body {
            return Err(RevisionError::NoBody {
                revision_id: self.id,
            });
        }
        File::open(&self.body_path)
            .await
            .map_err(|e| RevisionError::io(&self.body_path, e))
    }

    /// Reads the whole body into memory.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceRevision::open_body`], plus read failures.
    pub async fn read_body(&self) -> Result<Vec<u8>, RevisionError> {
        let mut file = self.open_body().await?;
        let mut body = Vec::new();
        file.read_to_end(&mut body)
            .await
            .map_err(|e| RevisionError::io(&self.body_path, e))?;
        Ok(body)
    }

    /// Size of the body file in bytes.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceRevision::open_body`].
    pub async fn body_size(&self) -> Result<u64, RevisionError> {
        let file = self.open_body().await?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| RevisionError::io(&self.body_path, e))?;
        Ok(metadata.len())
    }
}

fn decode_column<T: DeserializeOwned>(
    revision_id: RevisionId,
    column: &'static str,
    text: Option<&str>,
) -> Result<Option<T>, RevisionError> {
    match text {
        None => Ok(None),
        Some(text) => serde_json::from_str::<Option<T>>(text).map_err(|source| {
            RevisionError::Decode {
                revision_id,
                column,
                source,
            }
        }),
    }
}

/// Streams `body` into a new file at `path`, removing the file on failure.
async fn write_body(path: &Path, mut body: BodyStream) -> Result<u64, RevisionError> {
    let result = stream_to_file(path, &mut body).await;
    if result.is_err() {
        if let Err(e) = remove_body(path).await {
            warn!(path = %path.display(), error = %e, "failed to remove partial body");
        }
    }
    result
}

async fn stream_to_file(path: &Path, body: &mut BodyStream) -> Result<u64, RevisionError> {
    let file = File::create(path)
        .await
        .map_err(|e| RevisionError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| RevisionError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| RevisionError::io(path, e))?;
    Ok(bytes_written)
}

async fn remove_body(path: &Path) -> Result<(), RevisionError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RevisionError::io(path, e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures_util::stream;

    use super::*;
    use crate::db::DbError;
    use crate::fetch::FetchError;
    use crate::project::ProjectOptions;
    use crate::store::{
        GroupRow, ProjectStore, PropertyRow, ResourceRow, RootResourceRow, SqliteStore,
    };

    /// Delegates to SQLite but refuses to delete revision rows.
    #[derive(Debug)]
    struct UndeletableRevisions(SqliteStore);

    #[async_trait]
    impl ProjectStore for UndeletableRevisions {
        async fn load_properties(&self) -> Result<Vec<PropertyRow>, DbError> {
            self.0.load_properties().await
        }
        async fn load_resources(&self) -> Result<Vec<ResourceRow>, DbError> {
            self.0.load_resources().await
        }
        async fn load_root_resources(&self) -> Result<Vec<RootResourceRow>, DbError> {
            self.0.load_root_resources().await
        }
        async fn load_groups(&self) -> Result<Vec<GroupRow>, DbError> {
            self.0.load_groups().await
        }
        async fn set_property(&self, name: &str, value: Option<&str>) -> Result<(), DbError> {
            self.0.set_property(name, value).await
        }
        async fn insert_resource(&self, url: &str) -> Result<i64, DbError> {
            self.0.insert_resource(url).await
        }
        async fn update_resource_url(&self, id: i64, url: &str) -> Result<(), DbError> {
            self.0.update_resource_url(id, url).await
        }
        async fn delete_resource(&self, id: i64) -> Result<(), DbError> {
            self.0.delete_resource(id).await
        }
        async fn insert_root_resource(&self, name: &str, resource_id: i64) -> Result<i64, DbError> {
            self.0.insert_root_resource(name, resource_id).await
        }
        async fn delete_root_resource(&self, id: i64) -> Result<(), DbError> {
            self.0.delete_root_resource(id).await
        }
        async fn insert_group(
            &self,
            name: &str,
            url_pattern: &str,
            source: Option<(&str, i64)>,
        ) -> Result<i64, DbError> {
            self.0.insert_group(name, url_pattern, source).await
        }
        async fn update_group_source(
            &self,
            id: i64,
            source: Option<(&str, i64)>,
        ) -> Result<(), DbError> {
            self.0.update_group_source(id, source).await
        }
        async fn delete_group(&self, id: i64) -> Result<(), DbError> {
            self.0.delete_group(id).await
        }
        async fn insert_revision(
            &self,
            resource_id: i64,
            error: &str,
            metadata: &str,
        ) -> Result<i64, DbError> {
            self.0.insert_revision(resource_id, error, metadata).await
        }
        async fn delete_revision(&self, _id: i64) -> Result<(), DbError> {
            Err(DbError::Sqlx(sqlx::Error::PoolTimedOut))
        }
        async fn list_revisions(&self, resource_id: i64) -> Result<Vec<RevisionRow>, DbError> {
            self.0.list_revisions(resource_id).await
        }
        async fn latest_revision(&self, resource_id: i64) -> Result<Option<RevisionRow>, DbError> {
            self.0.latest_revision(resource_id).await
        }
        async fn has_revisions(&self, resource_id: i64) -> Result<bool, DbError> {
            self.0.has_revisions(resource_id).await
        }
    }

    fn ok_metadata() -> Option<RevisionMetadata> {
        Some(RevisionMetadata {
            http_version: 11,
            status_code: 200,
            reason_phrase: "OK".into(),
            headers: vec![("Content-Type".into(), "text/plain".into())],
        })
    }

    fn body_of(chunks: Vec<Result<Bytes, FetchError>>) -> BodyStream {
        stream::iter(chunks).boxed()
    }

    async fn project() -> (tempfile::TempDir, Project) {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path(), ProjectOptions::default()).await.unwrap();
        (dir, project)
    }

    #[tokio::test]
    async fn test_body_round_trip() {
        let (_dir, project) = project().await;
        let resource = project.resolve("https://example.com/a.txt").await.unwrap();

        let revision = project
            .record_revision(
                &resource,
                RevisionOutcome::Response {
                    metadata: ok_metadata(),
                    body: body_of(vec![Ok(Bytes::from("hello ")), Ok(Bytes::from("world"))]),
                },
            )
            .await
            .unwrap();

        assert!(revision.has_body());
        assert_eq!(revision.read_body().await.unwrap(), b"hello world");
        assert_eq!(revision.body_size().await.unwrap(), 11);

        let listed = project.list_revisions(&resource).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].metadata(), ok_metadata().as_ref());
        assert!(listed[0].has_body());
    }

    #[tokio::test]
    async fn test_error_revision_has_no_body() {
        let (_dir, project) = project().await;
        let resource = project.resolve("https://example.com/").await.unwrap();

        let revision = project
            .record_revision(
                &resource,
                RevisionOutcome::Error(PersistedError::new("ConnectionFailure", "refused")),
            )
            .await
            .unwrap();

        assert!(!revision.has_body());
        assert!(matches!(
            revision.open_body().await,
            Err(RevisionError::NoBody { .. })
        ));
        let stored = project.default_revision(&resource).await.unwrap().unwrap();
        assert_eq!(stored.error().unwrap().error_type, "ConnectionFailure");
        assert!(stored.metadata().is_none());
    }

    #[tokio::test]
    async fn test_default_revision_is_newest() {
        let (_dir, project) = project().await;
        let resource = project.resolve("https://example.com/").await.unwrap();
        assert!(!project.has_any_revisions(&resource).await.unwrap());

        project
            .record_revision(
                &resource,
                RevisionOutcome::Error(PersistedError::new("ProtocolError", "first")),
            )
            .await
            .unwrap();
        let second = project
            .record_revision(
                &resource,
                RevisionOutcome::Response {
                    metadata: ok_metadata(),
                    body: body_of(vec![Ok(Bytes::from("x"))]),
                },
            )
            .await
            .unwrap();

        let default = project.default_revision(&resource).await.unwrap().unwrap();
        assert_eq!(default.id(), second.id());
        let listed = project.list_revisions(&resource).await.unwrap();
        assert_eq!(listed[0].id(), second.id());
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_body_is_rolled_back_into_error_revision() {
        let (_dir, project) = project().await;
        let resource = project.resolve("https://example.com/big").await.unwrap();

        let revision = project
            .record_revision(
                &resource,
                RevisionOutcome::Response {
                    metadata: ok_metadata(),
                    body: body_of(vec![
                        Ok(Bytes::from("partial")),
                        Err(FetchError::connection("https://example.com/big", "reset")),
                    ]),
                },
            )
            .await
            .unwrap();

        assert_eq!(revision.error().unwrap().error_type, "ConnectionFailure");
        assert!(!revision.has_body());

        let listed = project.list_revisions(&resource).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].is_error());
        assert!(!listed[0].has_body());
        let leftover = std::fs::read_dir(project.revisions_dir()).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported_and_leaves_no_body() {
        let dir = tempfile::tempdir().unwrap();
        let wrap = |store| -> Arc<dyn ProjectStore> { Arc::new(UndeletableRevisions(store)) };
        let project = Project::open_with_store(dir.path(), ProjectOptions::default(), wrap)
            .await
            .unwrap();
        let resource = project.resolve("https://example.com/big").await.unwrap();

        let result = project
            .record_revision(
                &resource,
                RevisionOutcome::Response {
                    metadata: ok_metadata(),
                    body: body_of(vec![Err(FetchError::connection(
                        "https://example.com/big",
                        "reset",
                    ))]),
                },
            )
            .await;

        assert!(matches!(result, Err(RevisionError::Db(_))));
        let leftover = std::fs::read_dir(project.revisions_dir()).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_delete_revision_removes_body_and_row() {
        let (_dir, project) = project().await;
        let resource = project.resolve("https://example.com/").await.unwrap();
        let revision = project
            .record_revision(
                &resource,
                RevisionOutcome::Response {
                    metadata: None,
                    body: body_of(vec![Ok(Bytes::from("x"))]),
                },
            )
            .await
            .unwrap();

        project.delete_revision(&revision).await.unwrap();

        assert!(!revision.body_path().exists());
        assert!(project.list_revisions(&resource).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_sql_null_columns_decode_as_absent() {
        let (_dir, project) = project().await;
        let resource = project.resolve("https://example.com/").await.unwrap();
        assert!(
            decode_column::<PersistedError>(RevisionId(1), "error", None)
                .unwrap()
                .is_none()
        );
        assert!(
            decode_column::<PersistedError>(RevisionId(1), "error", Some("null"))
                .unwrap()
                .is_none()
        );
        assert!(project.default_revision(&resource).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_resource_is_rejected() {
        let (_dir_a, a) = project().await;
        let (_dir_b, b) = project().await;
        let foreign = b.resolve("https://example.com/").await.unwrap();

        let result = a
            .record_revision(
                &foreign,
                RevisionOutcome::Error(PersistedError::new("ProtocolError", "x")),
            )
            .await;

        assert!(matches!(
            result,
            Err(RevisionError::Model(ModelError::CrossProjectReference))
        ));
    }
}
