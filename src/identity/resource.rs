use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{ProjectId, ResourceId};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

const LIVE: u8 = 0;
const DELETING: u8 = 1;
const DELETED: u8 = 2;

/// Identity of one in-memory resource, unique within the process.
///
/// A [`ResourceId`] may be handed out again after its resource is deleted
/// from a project created before ids were made monotonic; a key never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    id: ResourceId,
    instance: u64,
}

impl ResourceKey {
    #[must_use]
    pub fn id(self) -> ResourceId {
        self.id
    }
}

/// Shared handle to a resource.
///
/// Cloning is cheap. Two handles are equal only if they refer to the same
/// in-memory identity, which the owning project guarantees is unique per URL.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<ResourceInner>,
}

struct ResourceInner {
    key: ResourceKey,
    project: ProjectId,
    url: RwLock<String>,
    downloaded_this_session: AtomicBool,
    lifecycle: AtomicU8,
}

impl Resource {
    pub(crate) fn new(id: ResourceId, project: ProjectId, url: String) -> Self {
        Self {
            inner: Arc::new(ResourceInner {
                key: ResourceKey {
                    id,
                    instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                },
                project,
                url: RwLock::new(url),
                downloaded_this_session: AtomicBool::new(false),
                lifecycle: AtomicU8::new(LIVE),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.inner.key.id
    }

    /// Returns the process-unique key of this in-memory identity.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        self.inner.key
    }

    /// Returns the project instance that owns this resource.
    #[must_use]
    pub fn project_id(&self) -> ProjectId {
        self.inner.project
    }

    /// Returns the current URL. Changes only through `Project::rename_resource`.
    #[must_use]
    pub fn url(&self) -> String {
        self.inner
            .url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_url(&self, url: String) {
        *self
            .inner
            .url
            .write()
            .unwrap_or_else(PoisonError::into_inner) = url;
    }

    /// Whether a fetch of this resource completed since the project was opened.
    #[must_use]
    pub fn already_downloaded_this_session(&self) -> bool {
        self.inner.downloaded_this_session.load(Ordering::Acquire)
    }

    pub(crate) fn mark_downloaded_this_session(&self) {
        self.inner
            .downloaded_this_session
            .store(true, Ordering::Release);
    }

    /// Whether this resource has been deleted from its project.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.inner.lifecycle.load(Ordering::Acquire) == DELETED
    }

    /// Whether new revisions may still be recorded. False once deletion starts.
    pub(crate) fn accepts_revisions(&self) -> bool {
        self.inner.lifecycle.load(Ordering::Acquire) == LIVE
    }

    /// Stops new revisions from being recorded. Call with the writer lock held.
    pub(crate) fn begin_delete(&self) {
        self.inner.lifecycle.store(DELETING, Ordering::Release);
    }

    /// Undoes [`Resource::begin_delete`] after a failed deletion.
    pub(crate) fn abort_delete(&self) {
        // Only a resource still being deleted goes back to live.
        let _ = self.inner.lifecycle.compare_exchange(
            DELETING,
            LIVE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_deleted(&self) {
        self.inner.lifecycle.store(DELETED, Ordering::Release);
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.key.hash(state);
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Resource").field(&self.url()).finish()
    }
}
