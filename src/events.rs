//! Ordered project event dispatch.
//!
//! Identity changes are delivered first to the internal subscriber (the group
//! index), then broadcast to external observers together with any events the
//! internal subscriber derived from them. Dispatch always happens while the
//! project state lock is held, so observers see events in commit order.

use tokio::sync::broadcast;
use tracing::trace;

use crate::identity::Resource;
use crate::types::ResourceGroupId;

/// Capacity of the external event channel. Slow receivers observe
/// [`broadcast::error::RecvError::Lagged`] past this point.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something that changed in a project.
#[derive(Debug, Clone)]
pub enum ProjectEvent {
    /// A new resource was created.
    ResourceInstantiated {
        /// The new resource.
        resource: Resource,
    },
    /// A resource was renamed.
    ResourceUrlAltered {
        /// The renamed resource (already carrying `new_url`).
        resource: Resource,
        /// URL before the rename.
        old_url: String,
        /// URL after the rename.
        new_url: String,
    },
    /// A resource was deleted.
    ResourceDeleted {
        /// The deleted resource.
        resource: Resource,
    },
    /// A resource started matching a group's pattern.
    GroupMemberAdded {
        /// Group gaining the member.
        group: ResourceGroupId,
        /// The new member.
        resource: Resource,
    },
    /// A resource stopped matching a group's pattern, or was deleted.
    GroupMemberRemoved {
        /// Group losing the member.
        group: ResourceGroupId,
        /// The former member.
        resource: Resource,
    },
}

/// Receives every identity event before external observers do.
pub(crate) trait InternalSubscriber {
    /// Handles an event and returns the events it derived from it.
    fn handle(&mut self, event: &ProjectEvent) -> Vec<ProjectEvent>;
}

/// Fan-out point for project events.
#[derive(Debug)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<ProjectEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.sender.subscribe()
    }

    /// Delivers `event` to `internal`, then to external subscribers.
    pub(crate) fn dispatch(&self, internal: &mut dyn InternalSubscriber, event: ProjectEvent) {
        let derived = internal.handle(&event);
        self.publish(event);
        for event in derived {
            self.publish(event);
        }
    }

    fn publish(&self, event: ProjectEvent) {
        // Err only means nobody is listening right now.
        if self.sender.send(event).is_err() {
            trace!("no event subscribers");
        }
    }
}
