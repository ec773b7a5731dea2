//! In-memory project tables, guarded by the project's writer lock.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::debug;

use super::ProjectError;
use crate::group::{GroupEntry, GroupIndex, GroupSource, UrlPattern};
use crate::identity::{Resource, RootResource};
use crate::store::ProjectStore;
use crate::types::{ProjectId, ResourceGroupId, ResourceId, RootResourceId};

#[derive(Debug, Default)]
pub(crate) struct ProjectState {
    pub(crate) properties: HashMap<String, String>,
    pub(crate) resources_by_url: HashMap<String, Resource>,
    pub(crate) resources_by_id: BTreeMap<ResourceId, Resource>,
    pub(crate) roots: BTreeMap<RootResourceId, RootResource>,
    pub(crate) root_by_resource: HashMap<ResourceId, RootResourceId>,
    pub(crate) groups: GroupIndex,
}

impl ProjectState {
    /// Loads every table. Stored URLs are taken as-is, never re-normalized.
    pub(crate) async fn load(
        path: &Path,
        project: ProjectId,
        store: &dyn ProjectStore,
    ) -> Result<Self, ProjectError> {
        let mut state = Self::default();

        for row in store.load_properties().await? {
            if let Some(value) = row.value {
                state.properties.insert(row.name, value);
            }
        }

        for row in store.load_resources().await? {
            state.insert_resource(Resource::new(ResourceId(row.id), project, row.url));
        }

        for row in store.load_root_resources().await? {
            let resource = state
                .resources_by_id
                .get(&ResourceId(row.resource_id))
                .cloned()
                .ok_or_else(|| {
                    ProjectError::invalid_format(
                        path,
                        format!(
                            "root resource {} references missing resource {}",
                            row.id, row.resource_id
                        ),
                    )
                })?;
            state.insert_root(RootResource::new(RootResourceId(row.id), row.name, resource));
        }

        for row in store.load_groups().await? {
            let pattern = UrlPattern::compile(&row.url_pattern).map_err(|err| {
                ProjectError::invalid_format(
                    path,
                    format!("group {} has invalid pattern: {err}", row.id),
                )
            })?;
            let source = match &row.source {
                None => None,
                Some((kind, id)) => Some(GroupSource::from_columns(kind, *id).ok_or_else(
                    || {
                        ProjectError::invalid_format(
                            path,
                            format!("group {} has unknown source type {kind:?}", row.id),
                        )
                    },
                )?),
            };
            let mut entry = GroupEntry::new(ResourceGroupId(row.id), row.name, pattern, source);
            entry.scan(state.resources_by_id.values());
            state.groups.insert(entry);
        }

        // Sources may point at groups loaded later, so check them in a second pass.
        for group in state.groups.iter() {
            if let Some(source) = group.source {
                if !state.source_exists(source) {
                    return Err(ProjectError::invalid_format(
                        path,
                        format!("group {} references missing source {source:?}", group.id),
                    ));
                }
            }
        }

        debug!(
            resources = state.resources_by_id.len(),
            root_resources = state.roots.len(),
            "project state loaded"
        );
        Ok(state)
    }

    pub(crate) fn insert_resource(&mut self, resource: Resource) {
        self.resources_by_url
            .insert(resource.url(), resource.clone());
        self.resources_by_id.insert(resource.id(), resource);
    }

    pub(crate) fn insert_root(&mut self, root: RootResource) {
        self.root_by_resource.insert(root.resource().id(), root.id());
        self.roots.insert(root.id(), root);
    }

    pub(crate) fn source_exists(&self, source: GroupSource) -> bool {
        match source {
            GroupSource::RootResource(id) => self.roots.contains_key(&id),
            GroupSource::ResourceGroup(id) => self.groups.get(id).is_some(),
        }
    }
}
