//! Task handles, progress and completion signalling.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::future::{BoxFuture, Shared};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::OrchestratorError;
use crate::identity::ResourceKey;
use crate::revision::ResourceRevision;
use crate::types::ResourceGroupId;

/// Result of a download task.
///
/// `Ok(None)` is returned by no-result tasks and group tasks. Fetch failures
/// arrive as `Ok(Some(revision))` where the revision carries the error.
pub type DownloadOutcome = Result<Option<ResourceRevision>, Arc<OrchestratorError>>;

pub(crate) type SharedOutcome = Shared<BoxFuture<'static, DownloadOutcome>>;

/// What a task does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Fetch and record one resource.
    Body,
    /// Body, then every embedded resource one level deep.
    Full,
    /// Like [`TaskKind::Full`] but resolving to `Ok(None)`.
    FullNoResult,
    /// Download every member of a group.
    DownloadGroup,
    /// Download a group's source.
    UpdateGroupMembership,
}

/// Registry key: at most one task runs per key.
///
/// Resource tasks are keyed by the in-memory identity, so a resource created
/// after another was deleted never joins the deleted one's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKey {
    Resource(ResourceKey, TaskKind),
    Group(ResourceGroupId, TaskKind),
}

impl TaskKey {
    #[must_use]
    pub fn kind(self) -> TaskKind {
        match self {
            Self::Resource(_, kind) | Self::Group(_, kind) => kind,
        }
    }
}

/// Options for [`Orchestrator::download`](super::Orchestrator::download).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Wait for embedded resources too, not just the resource itself.
    pub wait_for_embedded: bool,
    /// Resolve to the resource's revision; otherwise to `Ok(None)`.
    pub needs_result: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            wait_for_embedded: false,
            needs_result: true,
        }
    }
}

/// Labels and counters for presenting a running task.
#[derive(Debug)]
pub struct TaskProgress {
    title: String,
    subtitle: RwLock<String>,
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl TaskProgress {
    pub(crate) fn new(title: String) -> Self {
        Self {
            title,
            subtitle: RwLock::new("Queued".to_owned()),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn subtitle(&self) -> String {
        match self.subtitle.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Children finished so far.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Children scheduled so far.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub(crate) fn set_subtitle(&self, subtitle: impl Into<String>) {
        let subtitle = subtitle.into();
        match self.subtitle.write() {
            Ok(mut guard) => *guard = subtitle,
            Err(poisoned) => *poisoned.into_inner() = subtitle,
        }
    }

    pub(crate) fn add_total(&self, count: usize) {
        self.total.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A running (or finished) download task. Cheap to clone.
///
/// Every caller asking for the same key while the task runs gets a handle to
/// the same task and observes the same outcome.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<HandleInner>,
    wait_for_embedded: bool,
}

struct HandleInner {
    key: TaskKey,
    serial: u64,
    progress: Arc<TaskProgress>,
    primary: SharedOutcome,
    finished: SharedOutcome,
    cancel: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn new(
        key: TaskKey,
        serial: u64,
        progress: Arc<TaskProgress>,
        primary: SharedOutcome,
        finished: SharedOutcome,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                key,
                serial,
                progress,
                primary,
                finished,
                cancel,
            }),
            wait_for_embedded: false,
        }
    }

    /// Returns a handle whose [`wait`](Self::wait) also covers embedded resources.
    #[must_use]
    pub fn with_wait_for_embedded(mut self, wait_for_embedded: bool) -> Self {
        self.wait_for_embedded = wait_for_embedded;
        self
    }

    #[must_use]
    pub fn key(&self) -> TaskKey {
        self.inner.key
    }

    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.inner.key.kind()
    }

    pub(crate) fn serial(&self) -> u64 {
        self.inner.serial
    }

    #[must_use]
    pub fn progress(&self) -> &TaskProgress {
        &self.inner.progress
    }

    /// Waits for the outcome this handle was requested with.
    ///
    /// For full downloads that is the resource's own revision unless the
    /// handle waits for embedded resources; otherwise the task's end.
    pub async fn wait(&self) -> DownloadOutcome {
        if self.wait_for_embedded {
            self.inner.finished.clone().await
        } else {
            self.inner.primary.clone().await
        }
    }

    /// Waits until the task and all its children are done.
    pub async fn wait_finished(&self) -> DownloadOutcome {
        self.inner.finished.clone().await
    }

    /// Stops the task from scheduling further children.
    ///
    /// Fetches already in flight run to completion.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("key", &self.inner.key)
            .field("serial", &self.inner.serial)
            .field("title", &self.inner.progress.title())
            .field("wait_for_embedded", &self.wait_for_embedded)
            .finish_non_exhaustive()
    }
}

/// What a task body gets to report with.
pub(crate) struct TaskContext {
    pub(crate) progress: Arc<TaskProgress>,
    pub(crate) cancel: CancellationToken,
    primary: Option<oneshot::Sender<DownloadOutcome>>,
}

impl TaskContext {
    pub(crate) fn new(
        progress: Arc<TaskProgress>,
        cancel: CancellationToken,
        primary: oneshot::Sender<DownloadOutcome>,
    ) -> Self {
        Self {
            progress,
            cancel,
            primary: Some(primary),
        }
    }

    /// Releases waiters that only need the primary outcome. Later calls are ignored.
    pub(crate) fn complete_primary(&mut self, outcome: DownloadOutcome) {
        let Some(sender) = self.primary.take() else {
            return;
        };
        if sender.send(outcome).is_err() {
            trace!("no waiter for primary outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_counters() {
        let progress = TaskProgress::new("Downloading".into());
        progress.add_total(3);
        progress.increment_completed();
        progress.set_subtitle("1 of 3");

        assert_eq!(progress.title(), "Downloading");
        assert_eq!(progress.subtitle(), "1 of 3");
        assert_eq!(progress.completed(), 1);
        assert_eq!(progress.total(), 3);
    }

    #[test]
    fn test_task_key_kind() {
        let key = TaskKey::Group(ResourceGroupId(4), TaskKind::DownloadGroup);
        assert_eq!(key.kind(), TaskKind::DownloadGroup);
    }

    #[test]
    fn test_default_options_need_result() {
        let options = DownloadOptions::default();
        assert!(options.needs_result);
        assert!(!options.wait_for_embedded);
    }
}
