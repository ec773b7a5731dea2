//! Database connection and schema management.
//!
//! This module provides SQLite database connectivity with:
//! - Connection pool management
//! - WAL mode for concurrent reads
//! - Automatic migration execution
//!
//! # Example
//!
//! ```no_run
//! use webarchiver::{Database, DatabaseOptions};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open(Path::new("database.sqlite"), &DatabaseOptions::default()).await?;
//! // Use db for queries...
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::migrate::MigrateError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::instrument;

/// Default maximum number of connections in the pool.
/// Kept low for SQLite since it uses file-level locking.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in milliseconds.
/// Connections will wait this long before returning SQLITE_BUSY.
pub const DEFAULT_BUSY_TIMEOUT_MS: u32 = 5000;

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// A query or connection failed.
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] MigrateError),

    /// A persisted row holds a value the schema does not allow.
    #[error("corrupt row in {table} (id {id}): {reason}")]
    CorruptRow {
        /// Table containing the row.
        table: &'static str,
        /// Row id.
        id: i64,
        /// What was wrong with it.
        reason: String,
    },
}

/// `SQLITE_CORRUPT` primary result code.
const SQLITE_CORRUPT: i32 = 11;

/// `SQLITE_NOTADB` primary result code.
const SQLITE_NOTADB: i32 = 26;

impl DbError {
    /// Whether the database file or its contents are unusable, as opposed to
    /// a transient failure such as a busy lock.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Sqlx(e) => is_corrupt_sqlx(e),
            Self::Migration(
                MigrateError::Execute(e) | MigrateError::ExecuteMigration(e, _),
            ) => is_corrupt_sqlx(e),
            Self::Migration(_) | Self::CorruptRow { .. } => true,
        }
    }
}

fn is_corrupt_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(e) => e
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .is_some_and(|code| matches!(code & 0xff, SQLITE_CORRUPT | SQLITE_NOTADB)),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_) => true,
        _ => false,
    }
}

/// Pool tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseOptions {
    /// Maximum pooled connections (1..=20).
    pub max_connections: u32,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

/// Database connection wrapper with connection pool.
///
/// Handles SQLite connection pooling, WAL mode configuration,
/// and automatic migration execution.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at the specified path.
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Enable WAL mode for concurrent reads
    /// 3. Run any pending migrations
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlx` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path, options), fields(path = %db_path.display()))]
    pub async fn open(db_path: &Path, options: &DatabaseOptions) -> Result<Self, DbError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let connect_options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(u64::from(options.busy_timeout_ms)))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect_options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates an in-memory database for testing.
    ///
    /// The database exists only for the lifetime of the connection
    /// and is useful for unit tests. WAL mode is not enabled
    /// for in-memory databases as it provides no benefit.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlx` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Returns a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Sqlx` if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.eq_ignore_ascii_case("wal"))
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok(), "Failed to create in-memory database");
    }

    #[tokio::test]
    async fn test_database_resource_url_is_unique() {
        let db = Database::new_in_memory().await.unwrap();

        sqlx::query("INSERT INTO resource (url) VALUES ('https://example.com/')")
            .execute(db.pool())
            .await
            .unwrap();
        let duplicate = sqlx::query("INSERT INTO resource (url) VALUES ('https://example.com/')")
            .execute(db.pool())
            .await;

        assert!(duplicate.is_err(), "resource.url must be unique");
    }

    #[tokio::test]
    async fn test_database_root_resource_is_unique_per_resource() {
        let db = Database::new_in_memory().await.unwrap();

        sqlx::query("INSERT INTO resource (id, url) VALUES (1, 'https://example.com/')")
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO root_resource (name, resource_id) VALUES ('Home', 1)")
            .execute(db.pool())
            .await
            .unwrap();
        let duplicate =
            sqlx::query("INSERT INTO root_resource (name, resource_id) VALUES ('Again', 1)")
                .execute(db.pool())
                .await;

        assert!(duplicate.is_err(), "root_resource.resource_id must be unique");
    }

    #[tokio::test]
    async fn test_database_ids_are_not_reused() {
        let db = Database::new_in_memory().await.unwrap();
        let insert = |url: &'static str| {
            sqlx::query("INSERT INTO resource (url) VALUES (?)")
                .bind(url)
                .execute(db.pool())
        };

        insert("https://a.test/1").await.unwrap();
        let last = insert("https://a.test/2").await.unwrap().last_insert_rowid();
        sqlx::query("DELETE FROM resource WHERE id = ?")
            .bind(last)
            .execute(db.pool())
            .await
            .unwrap();
        let next = insert("https://a.test/3").await.unwrap().last_insert_rowid();

        assert!(next > last);
    }

    #[tokio::test]
    async fn test_garbage_file_is_corruption() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.sqlite");
        std::fs::write(&db_path, vec![0x42; 8192]).unwrap();

        let err = Database::open(&db_path, &DatabaseOptions::default())
            .await
            .unwrap_err();

        assert!(err.is_corruption(), "unexpected error: {err}");
    }

    #[test]
    fn test_corrupt_row_is_corruption() {
        let err = DbError::CorruptRow {
            table: "resource_group",
            id: 1,
            reason: "partial source reference".into(),
        };
        assert!(err.is_corruption());
        assert!(!DbError::Sqlx(sqlx::Error::PoolTimedOut).is_corruption());
    }

    #[tokio::test]
    async fn test_database_with_tempfile_enables_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.sqlite");

        let db = Database::open(&db_path, &DatabaseOptions::default())
            .await
            .unwrap();

        assert!(db.is_wal_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_database_migrations_are_rerunnable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.sqlite");

        let db = Database::open(&db_path, &DatabaseOptions::default())
            .await
            .unwrap();
        db.close().await;

        let reopened = Database::open(&db_path, &DatabaseOptions::default()).await;
        assert!(reopened.is_ok(), "reopening should not fail on migrations");
    }
}
