//! Web Archiver Core Library
//!
//! A personal web-archiving engine: URLs become durable resources, every
//! fetch is kept as an immutable revision, and pattern-based groups track
//! which resources belong together.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`project`] - Project directory, writer lock and properties
//! - [`identity`] - Resource identity resolution and root resources
//! - [`revision`] - Immutable revisions with streamed body files
//! - [`group`] - URL-pattern groups with incrementally maintained members
//! - [`fetch`] - Scheme-dispatched fetching (HTTP(S), FTP, `file`)
//! - [`orchestrator`] - Deduplicated download tasks and group downloads
//! - [`doc`] - Link extraction from archived HTML and CSS
//! - [`db`] / [`store`] - `SQLite` connection and table access

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod doc;
pub mod events;
pub mod fetch;
pub mod group;
pub mod identity;
pub mod orchestrator;
pub mod project;
pub mod revision;
pub mod store;
pub mod types;
pub mod user_agent;

// Re-export commonly used types
pub use config::{ArchiverConfig, ConfigError};
pub use db::{Database, DatabaseOptions, DbError};
pub use events::ProjectEvent;
pub use fetch::{FetchError, Fetcher, ProtocolFetcher};
pub use group::{GroupSource, ResourceGroup, UrlPattern};
pub use identity::{Resource, ResourceKey, RootResource};
pub use orchestrator::{
    DownloadOptions, DownloadOutcome, Orchestrator, OrchestratorError, TaskHandle, TaskKind,
};
pub use project::{ModelError, Project, ProjectError, ProjectOptions};
pub use revision::{PersistedError, ResourceRevision, RevisionError, RevisionMetadata};
pub use types::{ResourceGroupId, ResourceId, RevisionId, RootResourceId};
