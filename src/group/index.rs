//! Incremental group membership.
//!
//! Each group's members are computed by one scan when the group is created or
//! loaded. After that the index only reacts to identity events, so an update
//! costs one pattern match per group regardless of project size.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use tracing::trace;

use super::{GroupSource, ResourceGroup, UrlPattern};
use crate::events::{InternalSubscriber, ProjectEvent};
use crate::identity::Resource;
use crate::types::{ResourceGroupId, ResourceId};

#[derive(Debug)]
pub(crate) struct GroupEntry {
    pub(crate) id: ResourceGroupId,
    pub(crate) name: String,
    pub(crate) pattern: UrlPattern,
    pub(crate) source: Option<GroupSource>,
    members: BTreeMap<ResourceId, Resource>,
}

impl GroupEntry {
    pub(crate) fn new(
        id: ResourceGroupId,
        name: String,
        pattern: UrlPattern,
        source: Option<GroupSource>,
    ) -> Self {
        Self {
            id,
            name,
            pattern,
            source,
            members: BTreeMap::new(),
        }
    }

    /// Full scan; only used when the group is created or loaded.
    pub(crate) fn scan<'a>(&mut self, resources: impl IntoIterator<Item = &'a Resource>) {
        for resource in resources {
            if self.pattern.matches(&resource.url()) {
                self.members.insert(resource.id(), resource.clone());
            }
        }
    }

    fn add(&mut self, resource: &Resource) -> bool {
        match self.members.entry(resource.id()) {
            Entry::Vacant(slot) => {
                slot.insert(resource.clone());
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    fn remove(&mut self, id: ResourceId) -> bool {
        self.members.remove(&id).is_some()
    }

    pub(crate) fn members(&self) -> impl Iterator<Item = &Resource> {
        self.members.values()
    }

    pub(crate) fn snapshot(&self) -> ResourceGroup {
        ResourceGroup {
            id: self.id,
            name: self.name.clone(),
            url_pattern: self.pattern.as_str().to_owned(),
            source: self.source,
            members: self.members.values().cloned().collect(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct GroupIndex {
    groups: BTreeMap<ResourceGroupId, GroupEntry>,
}

impl GroupIndex {
    pub(crate) fn insert(&mut self, entry: GroupEntry) {
        self.groups.insert(entry.id, entry);
    }

    pub(crate) fn get(&self, id: ResourceGroupId) -> Option<&GroupEntry> {
        self.groups.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ResourceGroupId) -> Option<&mut GroupEntry> {
        self.groups.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: ResourceGroupId) -> Option<GroupEntry> {
        self.groups.remove(&id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &GroupEntry> {
        self.groups.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut GroupEntry> {
        self.groups.values_mut()
    }
}

impl InternalSubscriber for GroupIndex {
    fn handle(&mut self, event: &ProjectEvent) -> Vec<ProjectEvent> {
        let mut derived = Vec::new();
        match event {
            ProjectEvent::ResourceInstantiated { resource } => {
                let url = resource.url();
                for group in self.groups.values_mut() {
                    if group.pattern.matches(&url) && group.add(resource) {
                        derived.push(ProjectEvent::GroupMemberAdded {
                            group: group.id,
                            resource: resource.clone(),
                        });
                    }
                }
            }
            ProjectEvent::ResourceUrlAltered {
                resource,
                old_url,
                new_url,
            } => {
                for group in self.groups.values_mut() {
                    let was_member = group.pattern.matches(old_url);
                    let is_member = group.pattern.matches(new_url);
                    if was_member && !is_member && group.remove(resource.id()) {
                        derived.push(ProjectEvent::GroupMemberRemoved {
                            group: group.id,
                            resource: resource.clone(),
                        });
                    } else if is_member && !was_member && group.add(resource) {
                        derived.push(ProjectEvent::GroupMemberAdded {
                            group: group.id,
                            resource: resource.clone(),
                        });
                    }
                }
            }
            ProjectEvent::ResourceDeleted { resource } => {
                for group in self.groups.values_mut() {
                    if group.remove(resource.id()) {
                        derived.push(ProjectEvent::GroupMemberRemoved {
                            group: group.id,
                            resource: resource.clone(),
                        });
                    }
                }
            }
            ProjectEvent::GroupMemberAdded { .. } | ProjectEvent::GroupMemberRemoved { .. } => {}
        }
        if !derived.is_empty() {
            trace!(count = derived.len(), "group membership changed");
        }
        derived
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::ProjectId;

    fn index_with(pattern: &str) -> GroupIndex {
        let mut index = GroupIndex::default();
        index.insert(GroupEntry::new(
            ResourceGroupId(1),
            "G".into(),
            UrlPattern::compile(pattern).unwrap(),
            None,
        ));
        index
    }

    fn member_count(index: &GroupIndex) -> usize {
        index.get(ResourceGroupId(1)).unwrap().members().count()
    }

    #[test]
    fn test_instantiate_adds_matching_resource() {
        let mut index = index_with("https://example.com/*");
        let r = Resource::new(ResourceId(1), ProjectId::next(), "https://example.com/a".into());

        let derived = index.handle(&ProjectEvent::ResourceInstantiated { resource: r });

        assert_eq!(derived.len(), 1);
        assert_eq!(member_count(&index), 1);
    }

    #[test]
    fn test_instantiate_ignores_non_matching_resource() {
        let mut index = index_with("https://example.com/*");
        let r = Resource::new(ResourceId(1), ProjectId::next(), "https://other.com/a".into());

        assert!(
            index
                .handle(&ProjectEvent::ResourceInstantiated { resource: r })
                .is_empty()
        );
        assert_eq!(member_count(&index), 0);
    }

    #[test]
    fn test_rename_moves_membership() {
        let mut index = index_with("https://example.com/*");
        let r = Resource::new(ResourceId(1), ProjectId::next(), "https://example.com/a".into());
        index.handle(&ProjectEvent::ResourceInstantiated { resource: r.clone() });

        let derived = index.handle(&ProjectEvent::ResourceUrlAltered {
            resource: r.clone(),
            old_url: "https://example.com/a".into(),
            new_url: "https://other.com/a".into(),
        });
        assert!(matches!(derived[0], ProjectEvent::GroupMemberRemoved { .. }));
        assert_eq!(member_count(&index), 0);

        let derived = index.handle(&ProjectEvent::ResourceUrlAltered {
            resource: r,
            old_url: "https://other.com/a".into(),
            new_url: "https://example.com/b".into(),
        });
        assert!(matches!(derived[0], ProjectEvent::GroupMemberAdded { .. }));
        assert_eq!(member_count(&index), 1);
    }

    #[test]
    fn test_delete_removes_member() {
        let mut index = index_with("**");
        let r = Resource::new(ResourceId(1), ProjectId::next(), "https://example.com/a".into());
        index.handle(&ProjectEvent::ResourceInstantiated { resource: r.clone() });

        let derived = index.handle(&ProjectEvent::ResourceDeleted { resource: r });

        assert_eq!(derived.len(), 1);
        assert_eq!(member_count(&index), 0);
    }
}
