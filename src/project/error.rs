//! Error types for project and model operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::db::DbError;
use crate::types::RootResourceId;

/// Errors raised when a project cannot be opened.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The directory exists but is not a project, or its contents are corrupt.
    #[error("invalid project format at {path}: {reason}")]
    InvalidProjectFormat {
        /// Project directory.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// Database connection or migration failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// File system error creating or inspecting the project directory.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ProjectError {
    /// Creates an invalid-format error.
    pub fn invalid_format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidProjectFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Domain invariant violations surfaced by model mutations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The resource already has a root resource.
    #[error("a root resource already exists for {url}")]
    AlreadyExists {
        /// URL of the resource.
        url: String,
    },

    /// An entity from another project instance was passed in.
    #[error("entity belongs to a different project")]
    CrossProjectReference,

    /// A group source that does not exist, is the group itself, or forms a cycle.
    #[error("invalid group source: {reason}")]
    InvalidSource {
        /// Why the source was rejected.
        reason: String,
    },

    /// The resource cannot be deleted while root resources reference it.
    #[error("resource {url} is referenced by root resource(s) {root_resource_ids:?}")]
    ResourceReferenced {
        /// URL of the resource.
        url: String,
        /// Referencing root resources.
        root_resource_ids: Vec<RootResourceId>,
    },

    /// No entity with this id exists in the project.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of entity.
        entity: &'static str,
        /// Requested id.
        id: i64,
    },

    /// The resource was deleted and can no longer be used.
    #[error("resource {url} has been deleted")]
    ResourceDeleted {
        /// URL of the resource at deletion time.
        url: String,
    },

    /// A group URL pattern failed to compile.
    #[error("invalid URL pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern text.
        pattern: String,
        /// The compile error.
        #[source]
        source: regex::Error,
    },

    /// Persistence failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// File system error while removing revision bodies.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ModelError {
    /// Creates an invalid-source error.
    pub fn invalid_source(reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            reason: reason.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_referenced_lists_roots() {
        let err = ModelError::ResourceReferenced {
            url: "https://example.com/".into(),
            root_resource_ids: vec![RootResourceId(3)],
        };
        let msg = err.to_string();
        assert!(msg.contains("https://example.com/"));
        assert!(msg.contains("RootResourceId(3)"));
    }

    #[test]
    fn test_invalid_format_includes_reason() {
        let err = ProjectError::invalid_format("/tmp/p", "missing revisions directory");
        assert!(err.to_string().contains("missing revisions directory"));
    }
}
