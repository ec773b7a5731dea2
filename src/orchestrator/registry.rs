//! In-flight task registry.
//!
//! One entry per [`TaskKey`] while its task runs. A finished task removes its
//! own entry, matched by serial so a newer task under the same key is never
//! removed by an older one.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::OrchestratorError;
use super::task::{DownloadOutcome, SharedOutcome, TaskContext, TaskHandle, TaskKey, TaskProgress};

#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    tasks: DashMap<TaskKey, TaskHandle>,
    next_serial: AtomicU64,
}

impl TaskRegistry {
    /// Returns the running task for `key`, or spawns one built by `start`.
    ///
    /// `start` must only build the future; it runs while the registry entry
    /// is locked.
    pub(crate) fn get_or_spawn<F, Fut>(
        self: &Arc<Self>,
        key: TaskKey,
        title: impl FnOnce() -> String,
        start: F,
    ) -> TaskHandle
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = DownloadOutcome> + Send + 'static,
    {
        match self.tasks.entry(key) {
            Entry::Occupied(entry) => {
                trace!(?key, "joining in-flight task");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
                let handle = self.spawn(key, serial, title(), start);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    /// Handles of every task still running.
    pub(crate) fn active(&self) -> Vec<TaskHandle> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    fn spawn<F, Fut>(self: &Arc<Self>, key: TaskKey, serial: u64, title: String, start: F) -> TaskHandle
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = DownloadOutcome> + Send + 'static,
    {
        debug!(?key, serial, title = %title, "starting task");
        let progress = Arc::new(TaskProgress::new(title));
        let cancel = CancellationToken::new();
        let (primary_tx, primary_rx) = oneshot::channel();
        let task = start(TaskContext::new(
            Arc::clone(&progress),
            cancel.clone(),
            primary_tx,
        ));

        let release = ReleaseGuard {
            registry: Arc::clone(self),
            key,
            serial,
        };
        let join = tokio::spawn(async move {
            let _release = release;
            task.await
        });

        let finished: SharedOutcome = async move {
            match join.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_panic() => Err(Arc::new(OrchestratorError::TaskPanicked(
                    e.to_string(),
                ))),
                Err(_) => Err(Arc::new(OrchestratorError::TaskAborted)),
            }
        }
        .boxed()
        .shared();

        let primary: SharedOutcome = {
            let finished = finished.clone();
            async move {
                match primary_rx.await {
                    Ok(outcome) => outcome,
                    Err(_) => finished.await,
                }
            }
            .boxed()
            .shared()
        };

        TaskHandle::new(key, serial, progress, primary, finished, cancel)
    }
}

/// Removes the task's entry when the task ends, panics included.
struct ReleaseGuard {
    registry: Arc<TaskRegistry>,
    key: TaskKey,
    serial: u64,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let serial = self.serial;
        if self
            .registry
            .tasks
            .remove_if(&self.key, |_, handle| handle.serial() == serial)
            .is_some()
        {
            trace!(key = ?self.key, serial, "task released");
        }
    }
}
