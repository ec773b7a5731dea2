//! Project: the persistence root.
//!
//! A project is a directory holding `database.sqlite` and a `revisions/`
//! directory of body files named by revision id. All table mutations go
//! through a single writer lock; the database commit and the in-memory update
//! happen while it is held, so ids and events are strictly ordered.

mod error;
mod state;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, broadcast};
use tracing::{debug, info, instrument};

pub use error::{ModelError, ProjectError};
pub(crate) use state::ProjectState;

use crate::db::{Database, DatabaseOptions, DbError};
use crate::doc::{LinkExtractor, HtmlLinkExtractor};
use crate::events::{EventBus, ProjectEvent};
use crate::identity::{PhpBbSessionNormalizer, Resource, UrlNormalizer};
use crate::store::{ProjectStore, SqliteStore};
use crate::types::ProjectId;

/// Database file inside a project directory.
pub const DATABASE_FILENAME: &str = "database.sqlite";

/// Revision body directory inside a project directory.
pub const REVISIONS_DIRNAME: &str = "revisions";

/// Property holding the URL prefix stripped by [`Project::display_url`].
pub const DEFAULT_URL_PREFIX_PROPERTY: &str = "default_url_prefix";

/// Collaborators and tuning for an opened project.
#[derive(Debug, Clone)]
pub struct ProjectOptions {
    /// Connection pool settings.
    pub db: DatabaseOptions,
    /// Parser used to find links in archived documents.
    pub link_extractor: Arc<dyn LinkExtractor>,
    /// Last-stage URL normalizers, applied in order.
    pub url_normalizers: Vec<Arc<dyn UrlNormalizer>>,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        Self {
            db: DatabaseOptions::default(),
            link_extractor: Arc::new(HtmlLinkExtractor),
            url_normalizers: vec![Arc::new(PhpBbSessionNormalizer)],
        }
    }
}

/// Handle to an open project. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Project {
    pub(crate) inner: Arc<ProjectInner>,
}

#[derive(Debug)]
pub(crate) struct ProjectInner {
    pub(crate) id: ProjectId,
    pub(crate) path: PathBuf,
    pub(crate) db: Database,
    pub(crate) store: Arc<dyn ProjectStore>,
    pub(crate) state: Mutex<ProjectState>,
    pub(crate) events: EventBus,
    pub(crate) normalizers: Vec<Arc<dyn UrlNormalizer>>,
    pub(crate) extractor: Arc<dyn LinkExtractor>,
}

impl Project {
    /// Opens the project at `path`, creating it if the directory is missing or empty.
    ///
    /// # Errors
    ///
    /// Returns `ProjectError::InvalidProjectFormat` if `path` holds something
    /// other than a project or its tables are corrupt.
    pub async fn open(path: &Path, options: ProjectOptions) -> Result<Self, ProjectError> {
        Self::open_with_store(path, options, |store| -> Arc<dyn ProjectStore> { Arc::new(store) })
            .await
    }

    /// Opens the project like [`Project::open`], routing all table access
    /// through the store `wrap` builds around the `SQLite` store.
    ///
    /// # Errors
    ///
    /// Same as [`Project::open`].
    #[instrument(skip(path, options, wrap), fields(path = %path.display()))]
    pub async fn open_with_store(
        path: &Path,
        options: ProjectOptions,
        wrap: impl FnOnce(SqliteStore) -> Arc<dyn ProjectStore>,
    ) -> Result<Self, ProjectError> {
        if is_missing_or_empty(path).await? {
            let revisions = path.join(REVISIONS_DIRNAME);
            tokio::fs::create_dir_all(&revisions)
                .await
                .map_err(|e| ProjectError::io(&revisions, e))?;
            info!("Creating new project");
        } else if !Self::is_valid(path).await {
            return Err(ProjectError::invalid_format(
                path,
                format!("expected {DATABASE_FILENAME} and a {REVISIONS_DIRNAME}/ directory"),
            ));
        }

        let db = Database::open(&path.join(DATABASE_FILENAME), &options.db)
            .await
            .map_err(|e| corrupt_as_invalid(path, e))?;
        let store = wrap(SqliteStore::new(db.clone()));
        let id = ProjectId::next();
        let state = match ProjectState::load(path, id, store.as_ref()).await {
            Ok(state) => state,
            Err(ProjectError::Db(e)) => {
                db.close().await;
                return Err(corrupt_as_invalid(path, e));
            }
            Err(e) => {
                db.close().await;
                return Err(e);
            }
        };

        info!("Project opened");
        Ok(Self {
            inner: Arc::new(ProjectInner {
                id,
                path: path.to_path_buf(),
                db,
                store,
                state: Mutex::new(state),
                events: EventBus::new(),
                normalizers: options.url_normalizers,
                extractor: options.link_extractor,
            }),
        })
    }

    /// Returns whether `path` looks like a project directory.
    pub async fn is_valid(path: &Path) -> bool {
        let db_ok = tokio::fs::metadata(path.join(DATABASE_FILENAME))
            .await
            .is_ok_and(|m| m.is_file());
        let revisions_ok = tokio::fs::metadata(path.join(REVISIONS_DIRNAME))
            .await
            .is_ok_and(|m| m.is_dir());
        db_ok && revisions_ok
    }

    /// Closes the database pool. Other clones of this handle stop working.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.inner.db.close().await;
        debug!("Project closed");
    }

    #[must_use]
    pub fn id(&self) -> ProjectId {
        self.inner.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    #[must_use]
    pub fn revisions_dir(&self) -> PathBuf {
        self.inner.path.join(REVISIONS_DIRNAME)
    }

    /// Subscribes to project events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.inner.events.subscribe()
    }

    /// Returns a copy of all project properties.
    pub async fn properties(&self) -> HashMap<String, String> {
        self.lock_state().await.properties.clone()
    }

    pub async fn property(&self, name: &str) -> Option<String> {
        self.lock_state().await.properties.get(name).cloned()
    }

    /// Sets a property, or removes it when `value` is `None`.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Db` if the write fails.
    #[instrument(skip(self, value))]
    pub async fn set_property(&self, name: &str, value: Option<&str>) -> Result<(), ModelError> {
        let mut state = self.lock_state().await;
        self.inner.store.set_property(name, value).await?;
        match value {
            Some(value) => state.properties.insert(name.to_owned(), value.to_owned()),
            None => state.properties.remove(name),
        };
        Ok(())
    }

    pub async fn default_url_prefix(&self) -> Option<String> {
        self.property(DEFAULT_URL_PREFIX_PROPERTY).await
    }

    /// Sets the prefix stripped from URLs for display.
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Db` if the write fails.
    pub async fn set_default_url_prefix(&self, prefix: Option<&str>) -> Result<(), ModelError> {
        self.set_property(DEFAULT_URL_PREFIX_PROPERTY, prefix).await
    }

    /// Returns `url` with the default URL prefix removed, if it has it.
    pub async fn display_url(&self, url: &str) -> String {
        match self.default_url_prefix().await {
            Some(prefix) if !prefix.is_empty() => {
                url.strip_prefix(prefix.as_str()).unwrap_or(url).to_owned()
            }
            _ => url.to_owned(),
        }
    }

    pub(crate) async fn lock_state(&self) -> MutexGuard<'_, ProjectState> {
        self.inner.state.lock().await
    }

    pub(crate) fn dispatch(&self, state: &mut ProjectState, event: ProjectEvent) {
        self.inner.events.dispatch(&mut state.groups, event);
    }

    /// Rejects resources that belong to another project instance or were deleted.
    pub(crate) fn ensure_owned(&self, resource: &Resource) -> Result<(), ModelError> {
        if resource.project_id() != self.inner.id {
            return Err(ModelError::CrossProjectReference);
        }
        if resource.is_deleted() {
            return Err(ModelError::ResourceDeleted {
                url: resource.url(),
            });
        }
        Ok(())
    }
}

/// Reports an unreadable database as a malformed project.
fn corrupt_as_invalid(path: &Path, err: DbError) -> ProjectError {
    if err.is_corruption() {
        ProjectError::invalid_format(path, format!("unreadable {DATABASE_FILENAME}: {err}"))
    } else {
        ProjectError::Db(err)
    }
}

async fn is_missing_or_empty(path: &Path) -> Result<bool, ProjectError> {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => Ok(entries
            .next_entry()
            .await
            .map_err(|e| ProjectError::io(path, e))?
            .is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(ProjectError::io(path, e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site");

        let project = Project::open(&path, ProjectOptions::default()).await.unwrap();

        assert!(Project::is_valid(&path).await);
        assert_eq!(project.revisions_dir(), path.join("revisions"));
    }

    #[tokio::test]
    async fn test_open_rejects_foreign_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let result = Project::open(dir.path(), ProjectOptions::default()).await;

        assert!(matches!(
            result,
            Err(ProjectError::InvalidProjectFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_garbage_database() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DATABASE_FILENAME), vec![0x42; 8192]).unwrap();
        std::fs::create_dir(dir.path().join(REVISIONS_DIRNAME)).unwrap();

        let result = Project::open(dir.path(), ProjectOptions::default()).await;

        assert!(
            matches!(result, Err(ProjectError::InvalidProjectFormat { .. })),
            "unexpected result: {result:?}"
        );
    }

    #[tokio::test]
    async fn test_open_rejects_corrupt_group_row() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path(), ProjectOptions::default()).await.unwrap();
        sqlx::query(
            "INSERT INTO resource_group (name, url_pattern, source_id) VALUES ('X', 'x#', 3)",
        )
        .execute(project.inner.db.pool())
        .await
        .unwrap();
        project.close().await;

        let result = Project::open(dir.path(), ProjectOptions::default()).await;

        assert!(matches!(
            result,
            Err(ProjectError::InvalidProjectFormat { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_accepts_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Project::open(dir.path(), ProjectOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_display_url_strips_default_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path(), ProjectOptions::default()).await.unwrap();

        project
            .set_default_url_prefix(Some("https://example.com"))
            .await
            .unwrap();

        assert_eq!(project.display_url("https://example.com/a").await, "/a");
        assert_eq!(
            project.display_url("https://other.com/a").await,
            "https://other.com/a"
        );
    }

    #[tokio::test]
    async fn test_properties_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::open(dir.path(), ProjectOptions::default()).await.unwrap();
        project.set_property("title", Some("Comics")).await.unwrap();
        project.close().await;

        let reopened = Project::open(dir.path(), ProjectOptions::default()).await.unwrap();
        assert_eq!(reopened.property("title").await.as_deref(), Some("Comics"));
    }
}
