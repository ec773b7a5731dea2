//! Error types for revision storage.

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DbError;
use crate::fetch::FetchError;
use crate::project::ModelError;
use crate::types::RevisionId;

/// Errors that can occur while recording or reading revisions.
#[derive(Debug, Error)]
pub enum RevisionError {
    /// The resource is foreign, deleted or otherwise unusable.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Index row read or write failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Body file read or write failed.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Body file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The body stream failed while it was being stored.
    #[error("body stream failed: {0}")]
    Body(#[from] FetchError),

    /// Error or metadata could not be serialized.
    #[error("failed to encode revision: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored error or metadata column is not valid JSON of the expected shape.
    #[error("revision {revision_id} has corrupt {column}: {source}")]
    Decode {
        /// Revision whose row is corrupt.
        revision_id: RevisionId,
        /// Column name.
        column: &'static str,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The revision was recorded without a body.
    #[error("revision {revision_id} has no body")]
    NoBody {
        /// The revision.
        revision_id: RevisionId,
    },
}

impl RevisionError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Type tag used when this failure is itself persisted as an error revision.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Body(fetch) => fetch.type_name(),
            Self::Io { .. } => "IoError",
            Self::Db(_) => "DatabaseError",
            Self::Model(_) => "ModelError",
            Self::Encode(_) | Self::Decode { .. } => "EncodingError",
            Self::NoBody { .. } => "NoBody",
        }
    }
}
