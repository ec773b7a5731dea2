//! Error types for download orchestration.

use thiserror::Error;

use crate::project::ModelError;
use crate::revision::RevisionError;

/// Errors a download task or its setup can fail with.
///
/// Fetch failures are not listed here: they are recorded as error revisions
/// and returned as successful outcomes.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The resource or group cannot be downloaded as requested.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Recording or reading a revision failed.
    #[error(transparent)]
    Revision(#[from] RevisionError),

    /// The task panicked.
    #[error("download task panicked: {0}")]
    TaskPanicked(String),

    /// The task was aborted before it produced an outcome.
    #[error("download task was aborted")]
    TaskAborted,

    /// The fetch permit semaphore was closed.
    #[error("fetch semaphore closed unexpectedly")]
    SemaphoreClosed,
}
