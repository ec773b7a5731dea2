//! Root resources: named pins on resources.

use tracing::{info, instrument};

use super::Resource;
use crate::group::GroupSource;
use crate::project::{ModelError, Project};
use crate::types::RootResourceId;

/// A user-declared, named pin on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootResource {
    id: RootResourceId,
    name: String,
    resource: Resource,
}

impl RootResource {
    pub(crate) fn new(id: RootResourceId, name: String, resource: Resource) -> Self {
        Self { id, name, resource }
    }

    #[must_use]
    pub fn id(&self) -> RootResourceId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

impl Project {
    /// Pins `resource` under `name`.
    ///
    /// # Errors
    ///
    /// - `ModelError::CrossProjectReference` if `resource` belongs to another project
    /// - `ModelError::AlreadyExists` if the resource already has a root resource
    #[instrument(skip(self, resource), fields(url = %resource.url()))]
    pub async fn create_root_resource(
        &self,
        name: &str,
        resource: &Resource,
    ) -> Result<RootResource, ModelError> {
        self.ensure_owned(resource)?;
        let mut state = self.lock_state().await;

        if state.root_by_resource.contains_key(&resource.id()) {
            return Err(ModelError::AlreadyExists {
                url: resource.url(),
            });
        }

        let id = RootResourceId(
            self.inner
                .store
                .insert_root_resource(name, resource.id().get())
                .await?,
        );
        let root = RootResource::new(id, name.to_owned(), resource.clone());
        state.insert_root(root.clone());
        info!(root_resource_id = %id, "root resource created");
        Ok(root)
    }

    /// Deletes a root resource. Groups using it as their source lose that source.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::NotFound` for unknown ids and `ModelError::Db` on
    /// write failure.
    #[instrument(skip(self))]
    pub async fn delete_root_resource(&self, id: RootResourceId) -> Result<(), ModelError> {
        let mut state = self.lock_state().await;
        let Some(root) = state.roots.get(&id).cloned() else {
            return Err(ModelError::not_found("root resource", id.get()));
        };

        let source = GroupSource::RootResource(id);
        for group in state.groups.iter_mut().filter(|g| g.source == Some(source)) {
            self.inner
                .store
                .update_group_source(group.id.get(), None)
                .await?;
            group.source = None;
        }

        self.inner.store.delete_root_resource(id.get()).await?;
        state.roots.remove(&id);
        state.root_by_resource.remove(&root.resource().id());
        info!("root resource deleted");
        Ok(())
    }

    /// Returns every root resource in creation order.
    pub async fn root_resources(&self) -> Vec<RootResource> {
        self.lock_state().await.roots.values().cloned().collect()
    }

    pub async fn root_resource(&self, id: RootResourceId) -> Option<RootResource> {
        self.lock_state().await.roots.get(&id).cloned()
    }

    /// Returns the root resource pinning `resource`, if any.
    pub async fn root_resource_for(&self, resource: &Resource) -> Option<RootResource> {
        let state = self.lock_state().await;
        state
            .root_by_resource
            .get(&resource.id())
            .and_then(|id| state.roots.get(id))
            .cloned()
    }

    pub async fn root_resource_named(&self, name: &str) -> Option<RootResource> {
        self.lock_state()
            .await
            .roots
            .values()
            .find(|root| root.name() == name)
            .cloned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::project::{ModelError, Project, ProjectOptions};

    #[tokio::test]
    async fn test_duplicate_root_resource_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path(), ProjectOptions::default()).await.unwrap();
        let r = project.resolve("https://example.com/").await.unwrap();

        project.create_root_resource("Home", &r).await.unwrap();
        let again = project.create_root_resource("Home again", &r).await;

        assert!(matches!(again, Err(ModelError::AlreadyExists { .. })));
        assert_eq!(project.root_resources().await.len(), 1);
    }

    #[tokio::test]
    async fn test_root_resource_lookup_by_resource_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path(), ProjectOptions::default()).await.unwrap();
        let r = project.resolve("https://example.com/").await.unwrap();
        let root = project.create_root_resource("Home", &r).await.unwrap();

        assert_eq!(project.root_resource_for(&r).await, Some(root.clone()));
        assert_eq!(project.root_resource_named("Home").await, Some(root.clone()));
        assert_eq!(project.root_resource(root.id()).await, Some(root));
    }
}
