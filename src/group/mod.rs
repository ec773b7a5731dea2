//! Resource groups: URL-pattern matchers with live membership.
//!
//! A group may name a *source*, a root resource or another group whose
//! download is expected to reveal all of the group's members.

mod index;
mod pattern;

use std::collections::HashSet;

use tracing::{info, instrument};

pub(crate) use index::{GroupEntry, GroupIndex};
pub use pattern::UrlPattern;

use crate::identity::Resource;
use crate::project::{ModelError, Project, ProjectState};
use crate::types::{ResourceGroupId, RootResourceId};

const SOURCE_TYPE_ROOT_RESOURCE: &str = "root_resource";
const SOURCE_TYPE_RESOURCE_GROUP: &str = "resource_group";

/// What a group downloads to discover its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupSource {
    RootResource(RootResourceId),
    ResourceGroup(ResourceGroupId),
}

impl GroupSource {
    /// Returns the persisted `(source_type, source_id)` pair.
    #[must_use]
    pub fn to_columns(self) -> (&'static str, i64) {
        match self {
            Self::RootResource(id) => (SOURCE_TYPE_ROOT_RESOURCE, id.get()),
            Self::ResourceGroup(id) => (SOURCE_TYPE_RESOURCE_GROUP, id.get()),
        }
    }

    /// Parses a persisted `(source_type, source_id)` pair.
    #[must_use]
    pub fn from_columns(source_type: &str, id: i64) -> Option<Self> {
        match source_type {
            SOURCE_TYPE_ROOT_RESOURCE => Some(Self::RootResource(RootResourceId(id))),
            SOURCE_TYPE_RESOURCE_GROUP => Some(Self::ResourceGroup(ResourceGroupId(id))),
            _ => None,
        }
    }
}

/// Snapshot of a group, including its members at the time it was taken.
#[derive(Debug, Clone)]
pub struct ResourceGroup {
    pub(crate) id: ResourceGroupId,
    pub(crate) name: String,
    pub(crate) url_pattern: String,
    pub(crate) source: Option<GroupSource>,
    pub(crate) members: Vec<Resource>,
}

impl ResourceGroup {
    #[must_use]
    pub fn id(&self) -> ResourceGroupId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn url_pattern(&self) -> &str {
        &self.url_pattern
    }

    #[must_use]
    pub fn source(&self) -> Option<GroupSource> {
        self.source
    }

    /// Members in creation order.
    #[must_use]
    pub fn members(&self) -> &[Resource] {
        &self.members
    }
}

/// Checks that `source` exists, is not `group` itself, and does not lead back
/// to `group` through a chain of group sources.
fn validate_source(
    state: &ProjectState,
    group: Option<ResourceGroupId>,
    source: Option<GroupSource>,
) -> Result<(), ModelError> {
    let Some(source) = source else {
        return Ok(());
    };
    if !state.source_exists(source) {
        return Err(ModelError::invalid_source(format!(
            "{source:?} does not exist"
        )));
    }
    let GroupSource::ResourceGroup(mut next) = source else {
        return Ok(());
    };
    let mut visited = HashSet::new();
    loop {
        if Some(next) == group {
            return Err(ModelError::invalid_source(
                "group sources would form a cycle",
            ));
        }
        if !visited.insert(next) {
            return Ok(());
        }
        match state.groups.get(next).and_then(|entry| entry.source) {
            Some(GroupSource::ResourceGroup(parent)) => next = parent,
            _ => return Ok(()),
        }
    }
}

impl Project {
    /// Creates a group. Its members are found by scanning existing resources once.
    ///
    /// # Errors
    ///
    /// - `ModelError::InvalidPattern` if the pattern does not compile
    /// - `ModelError::InvalidSource` if the source does not exist
    #[instrument(skip(self))]
    pub async fn create_group(
        &self,
        name: &str,
        url_pattern: &str,
        source: Option<GroupSource>,
    ) -> Result<ResourceGroup, ModelError> {
        let pattern =
            UrlPattern::compile(url_pattern).map_err(|err| ModelError::InvalidPattern {
                pattern: url_pattern.to_owned(),
                source: err,
            })?;

        let mut state = self.lock_state().await;
        validate_source(&state, None, source)?;

        let id = ResourceGroupId(
            self.inner
                .store
                .insert_group(name, url_pattern, source.map(GroupSource::to_columns))
                .await?,
        );
        let mut entry = GroupEntry::new(id, name.to_owned(), pattern, source);
        entry.scan(state.resources_by_id.values());
        let snapshot = entry.snapshot();
        state.groups.insert(entry);

        info!(group_id = %id, members = snapshot.members.len(), "group created");
        Ok(snapshot)
    }

    /// Sets or clears a group's source.
    ///
    /// # Errors
    ///
    /// - `ModelError::NotFound` if the group does not exist
    /// - `ModelError::InvalidSource` if the source does not exist, is the
    ///   group itself, or would create a cycle of group sources
    #[instrument(skip(self))]
    pub async fn set_group_source(
        &self,
        group: ResourceGroupId,
        source: Option<GroupSource>,
    ) -> Result<(), ModelError> {
        let mut state = self.lock_state().await;
        if state.groups.get(group).is_none() {
            return Err(ModelError::not_found("group", group.get()));
        }
        validate_source(&state, Some(group), source)?;

        self.inner
            .store
            .update_group_source(group.get(), source.map(GroupSource::to_columns))
            .await?;
        if let Some(entry) = state.groups.get_mut(group) {
            entry.source = source;
        }
        Ok(())
    }

    /// Deletes a group. Groups using it as their source lose that source.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::NotFound` for unknown ids and `ModelError::Db` on
    /// write failure.
    #[instrument(skip(self))]
    pub async fn delete_group(&self, group: ResourceGroupId) -> Result<(), ModelError> {
        let mut state = self.lock_state().await;
        if state.groups.get(group).is_none() {
            return Err(ModelError::not_found("group", group.get()));
        }

        let source = GroupSource::ResourceGroup(group);
        for dependent in state.groups.iter_mut().filter(|g| g.source == Some(source)) {
            self.inner
                .store
                .update_group_source(dependent.id.get(), None)
                .await?;
            dependent.source = None;
        }

        self.inner.store.delete_group(group.get()).await?;
        state.groups.remove(group);
        info!("group deleted");
        Ok(())
    }

    pub async fn group(&self, id: ResourceGroupId) -> Option<ResourceGroup> {
        self.lock_state().await.groups.get(id).map(GroupEntry::snapshot)
    }

    pub async fn group_named(&self, name: &str) -> Option<ResourceGroup> {
        self.lock_state()
            .await
            .groups
            .iter()
            .find(|g| g.name == name)
            .map(GroupEntry::snapshot)
    }

    /// Returns every group in creation order.
    pub async fn groups(&self) -> Vec<ResourceGroup> {
        self.lock_state()
            .await
            .groups
            .iter()
            .map(GroupEntry::snapshot)
            .collect()
    }

    /// Returns the current members of a group, or `None` if it does not exist.
    pub async fn group_members(&self, id: ResourceGroupId) -> Option<Vec<Resource>> {
        self.lock_state()
            .await
            .groups
            .get(id)
            .map(|g| g.members().cloned().collect())
    }
}
