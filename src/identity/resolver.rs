//! Resource lookup, creation, rename and deletion.

use tracing::{debug, info, instrument, warn};

use super::{Resource, url_alternatives};
use crate::events::ProjectEvent;
use crate::project::{ModelError, Project};
use crate::types::ResourceId;

impl Project {
    /// Returns the resource for `url`, creating it if no alternative of `url`
    /// is already claimed.
    ///
    /// Alternatives are searched least-normalized first so resources stored
    /// under older URL forms are found. New resources take the most normalized
    /// form.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Db` if the insert fails.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn resolve(&self, url: &str) -> Result<Resource, ModelError> {
        let alternatives = url_alternatives(url, &self.inner.normalizers);
        let mut state = self.lock_state().await;

        if let Some(existing) = alternatives
            .iter()
            .find_map(|candidate| state.resources_by_url.get(candidate))
        {
            return Ok(existing.clone());
        }

        let canonical = alternatives.last().map_or(url, String::as_str).to_owned();
        let id = ResourceId(self.inner.store.insert_resource(&canonical).await?);
        let resource = Resource::new(id, self.inner.id, canonical);
        state.insert_resource(resource.clone());
        debug!(resource_id = %id, canonical = %resource.url(), "resource created");

        self.dispatch(
            &mut state,
            ProjectEvent::ResourceInstantiated {
                resource: resource.clone(),
            },
        );
        Ok(resource)
    }

    /// Looks up the resource claiming exactly `url`. Never creates.
    pub async fn get_resource(&self, url: &str) -> Option<Resource> {
        self.lock_state().await.resources_by_url.get(url).cloned()
    }

    /// Looks up a resource by id.
    pub async fn resource(&self, id: ResourceId) -> Option<Resource> {
        self.lock_state().await.resources_by_id.get(&id).cloned()
    }

    /// Returns every resource in creation order.
    pub async fn resources(&self) -> Vec<Resource> {
        self.lock_state()
            .await
            .resources_by_id
            .values()
            .cloned()
            .collect()
    }

    pub async fn resource_count(&self) -> usize {
        self.lock_state().await.resources_by_id.len()
    }

    /// Renames `resource` to `new_url`.
    ///
    /// Returns `false` without changing anything if another resource already
    /// claims `new_url`.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::CrossProjectReference` or
    /// `ModelError::ResourceDeleted` for foreign or deleted resources, and
    /// `ModelError::Db` if the update fails.
    #[instrument(skip(self, resource), fields(resource_id = %resource.id(), new_url = %new_url))]
    pub async fn rename_resource(
        &self,
        resource: &Resource,
        new_url: &str,
    ) -> Result<bool, ModelError> {
        self.ensure_owned(resource)?;
        let mut state = self.lock_state().await;

        let old_url = resource.url();
        if old_url == new_url {
            return Ok(true);
        }
        if state.resources_by_url.contains_key(new_url) {
            debug!("rename target already claimed");
            return Ok(false);
        }

        self.inner
            .store
            .update_resource_url(resource.id().get(), new_url)
            .await?;
        state.resources_by_url.remove(&old_url);
        state
            .resources_by_url
            .insert(new_url.to_owned(), resource.clone());
        resource.set_url(new_url.to_owned());
        info!(old_url = %old_url, "resource renamed");

        self.dispatch(
            &mut state,
            ProjectEvent::ResourceUrlAltered {
                resource: resource.clone(),
                old_url,
                new_url: new_url.to_owned(),
            },
        );
        Ok(true)
    }

    /// Renames `resource` to the most normalized alternative of its URL.
    ///
    /// Returns `false` if that form is already claimed by another resource.
    ///
    /// # Errors
    ///
    /// Same as [`Project::rename_resource`].
    pub async fn try_normalize_url(&self, resource: &Resource) -> Result<bool, ModelError> {
        let alternatives = url_alternatives(&resource.url(), &self.inner.normalizers);
        match alternatives.last() {
            Some(normal) => self.rename_resource(resource, normal).await,
            None => Ok(true),
        }
    }

    /// Deletes `resource` and all of its revisions.
    ///
    /// No revision can be recorded for the resource once deletion starts. If
    /// deletion fails part way, the resource stays usable.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::ResourceReferenced` if a root resource points at
    /// it. Revision bodies that cannot be removed surface as `ModelError::Io`.
    #[instrument(skip(self, resource), fields(resource_id = %resource.id(), url = %resource.url()))]
    pub async fn delete_resource(&self, resource: &Resource) -> Result<(), ModelError> {
        self.ensure_owned(resource)?;

        {
            let state = self.lock_state().await;
            if let Some(root_id) = state.root_by_resource.get(&resource.id()) {
                return Err(ModelError::ResourceReferenced {
                    url: resource.url(),
                    root_resource_ids: vec![*root_id],
                });
            }
            // Revision inserts check this under the same lock.
            resource.begin_delete();
        }

        let result = self.remove_resource(resource).await;
        if result.is_err() {
            resource.abort_delete();
        }
        result
    }

    async fn remove_resource(&self, resource: &Resource) -> Result<(), ModelError> {
        let revisions = self
            .inner
            .store
            .list_revisions(resource.id().get())
            .await?;
        for row in revisions {
            let body = self.revisions_dir().join(row.id.to_string());
            match tokio::fs::remove_file(&body).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ModelError::io(body, e)),
            }
            let _state = self.lock_state().await;
            self.inner.store.delete_revision(row.id).await?;
        }

        let mut state = self.lock_state().await;
        // A root resource may have been created while revisions were removed.
        if let Some(root_id) = state.root_by_resource.get(&resource.id()) {
            warn!("resource became referenced during deletion");
            return Err(ModelError::ResourceReferenced {
                url: resource.url(),
                root_resource_ids: vec![*root_id],
            });
        }
        self.inner
            .store
            .delete_resource(resource.id().get())
            .await?;
        state.resources_by_url.remove(&resource.url());
        state.resources_by_id.remove(&resource.id());
        resource.mark_deleted();
        info!("resource deleted");

        self.dispatch(
            &mut state,
            ProjectEvent::ResourceDeleted {
                resource: resource.clone(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::project::{ModelError, Project, ProjectOptions};
    use crate::revision::{PersistedError, RevisionError, RevisionOutcome};

    async fn project() -> (tempfile::TempDir, Project) {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path(), ProjectOptions::default()).await.unwrap();
        (dir, project)
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent_across_equivalent_urls() {
        let (_dir, project) = project().await;

        let a = project.resolve("https://Example.com").await.unwrap();
        let b = project.resolve("https://example.com/").await.unwrap();
        let c = project.resolve("https://example.com/#top").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.url(), "https://example.com/");
        assert_eq!(project.resource_count().await, 1);
    }

    #[tokio::test]
    async fn test_get_resource_does_not_create() {
        let (_dir, project) = project().await;
        assert!(project.get_resource("https://example.com/").await.is_none());
        assert_eq!(project.resource_count().await, 0);
    }

    #[tokio::test]
    async fn test_rename_onto_claimed_url_fails_without_mutation() {
        let (_dir, project) = project().await;
        let a = project.resolve("https://example.com/a").await.unwrap();
        project.resolve("https://example.com/b").await.unwrap();

        let renamed = project
            .rename_resource(&a, "https://example.com/b")
            .await
            .unwrap();

        assert!(!renamed);
        assert_eq!(a.url(), "https://example.com/a");
        assert_eq!(
            project.get_resource("https://example.com/a").await,
            Some(a)
        );
    }

    #[tokio::test]
    async fn test_no_revision_is_recorded_while_deleting() {
        let (_dir, project) = project().await;
        let r = project.resolve("https://example.com/gone").await.unwrap();
        let late = || RevisionOutcome::Error(PersistedError::new("ConnectionFailure", "late"));

        r.begin_delete();
        let recorded = project.record_revision(&r, late()).await;
        assert!(matches!(
            recorded,
            Err(RevisionError::Model(ModelError::ResourceDeleted { .. }))
        ));

        r.abort_delete();
        assert!(project.record_revision(&r, late()).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_removes_every_revision_row() {
        let (_dir, project) = project().await;
        let r = project.resolve("https://example.com/gone").await.unwrap();
        for _ in 0..2 {
            project
                .record_revision(
                    &r,
                    RevisionOutcome::Error(PersistedError::new("ProtocolError", "x")),
                )
                .await
                .unwrap();
        }

        project.delete_resource(&r).await.unwrap();

        assert!(r.is_deleted());
        assert!(!r.accepts_revisions());
        let rows = project.inner.store.list_revisions(r.id().get()).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_resource_usable() {
        let (_dir, project) = project().await;
        let r = project.resolve("https://example.com/").await.unwrap();
        project.create_root_resource("Home", &r).await.unwrap();

        let err = project.delete_resource(&r).await.unwrap_err();

        assert!(matches!(err, ModelError::ResourceReferenced { .. }));
        assert!(r.accepts_revisions());
        assert!(!r.is_deleted());
    }

    #[tokio::test]
    async fn test_try_normalize_url_renames_legacy_form() {
        let (_dir, project) = project().await;
        let r = project.resolve("https://example.com/a").await.unwrap();
        project
            .rename_resource(&r, "https://EXAMPLE.com/a")
            .await
            .unwrap();

        assert!(project.try_normalize_url(&r).await.unwrap());
        assert_eq!(r.url(), "https://example.com/a");
    }
}
