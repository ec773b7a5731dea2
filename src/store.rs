//! Persistence seam for project tables.
//!
//! `Project` owns all in-memory state and ordering; it talks to storage only
//! through [`ProjectStore`], which keeps SQL out of the model code. A wrapper
//! store can be installed with [`Project::open_with_store`].
//!
//! [`Project::open_with_store`]: crate::project::Project::open_with_store

use async_trait::async_trait;
use sqlx::FromRow;
use tracing::instrument;

use crate::db::{Database, DbError};

/// `project_property` row.
#[derive(Debug, Clone, FromRow)]
pub struct PropertyRow {
    pub name: String,
    pub value: Option<String>,
}

/// `resource` row.
#[derive(Debug, Clone, FromRow)]
pub struct ResourceRow {
    pub id: i64,
    pub url: String,
}

/// `root_resource` row.
#[derive(Debug, Clone, FromRow)]
pub struct RootResourceRow {
    pub id: i64,
    pub name: String,
    pub resource_id: i64,
}

/// `resource_group` row.
#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: i64,
    pub name: String,
    pub url_pattern: String,
    /// `(source_type, source_id)`; the columns are both set or both NULL.
    pub source: Option<(String, i64)>,
}

#[derive(FromRow)]
struct GroupColumns {
    id: i64,
    name: String,
    url_pattern: String,
    source_type: Option<String>,
    source_id: Option<i64>,
}

impl TryFrom<GroupColumns> for GroupRow {
    type Error = DbError;

    fn try_from(row: GroupColumns) -> Result<Self, DbError> {
        let source = match (row.source_type, row.source_id) {
            (None, None) => None,
            (Some(kind), Some(id)) => Some((kind, id)),
            _ => {
                return Err(DbError::CorruptRow {
                    table: "resource_group",
                    id: row.id,
                    reason: "partial source reference".to_owned(),
                });
            }
        };
        Ok(Self {
            id: row.id,
            name: row.name,
            url_pattern: row.url_pattern,
            source,
        })
    }
}

/// `resource_revision` row. Columns hold JSON text; `"null"` (or SQL NULL in
/// older projects) marks absence.
#[derive(Debug, Clone, FromRow)]
pub struct RevisionRow {
    pub id: i64,
    pub resource_id: i64,
    pub error: Option<String>,
    pub metadata: Option<String>,
}

/// Data-access contract for a project's tables.
#[async_trait]
pub trait ProjectStore: Send + Sync + std::fmt::Debug {
    /// Reads every project property.
    async fn load_properties(&self) -> Result<Vec<PropertyRow>, DbError>;

    /// Reads every resource in id order.
    async fn load_resources(&self) -> Result<Vec<ResourceRow>, DbError>;

    /// Reads every root resource in id order.
    async fn load_root_resources(&self) -> Result<Vec<RootResourceRow>, DbError>;

    /// Reads every resource group in id order.
    ///
    /// A row with only one source column set is `DbError::CorruptRow`.
    async fn load_groups(&self) -> Result<Vec<GroupRow>, DbError>;

    /// Upserts a property; `None` deletes it.
    async fn set_property(&self, name: &str, value: Option<&str>) -> Result<(), DbError>;

    /// Inserts a resource and returns its new id.
    async fn insert_resource(&self, url: &str) -> Result<i64, DbError>;

    /// Changes the stored URL of a resource.
    async fn update_resource_url(&self, id: i64, url: &str) -> Result<(), DbError>;

    /// Deletes a resource row.
    async fn delete_resource(&self, id: i64) -> Result<(), DbError>;

    /// Inserts a root resource and returns its new id.
    async fn insert_root_resource(&self, name: &str, resource_id: i64) -> Result<i64, DbError>;

    /// Deletes a root resource row.
    async fn delete_root_resource(&self, id: i64) -> Result<(), DbError>;

    /// Inserts a resource group and returns its new id.
    async fn insert_group(
        &self,
        name: &str,
        url_pattern: &str,
        source: Option<(&str, i64)>,
    ) -> Result<i64, DbError>;

    /// Replaces the source columns of a group.
    async fn update_group_source(&self, id: i64, source: Option<(&str, i64)>)
    -> Result<(), DbError>;

    /// Deletes a resource group row.
    async fn delete_group(&self, id: i64) -> Result<(), DbError>;

    /// Inserts a revision row and returns its new id.
    async fn insert_revision(
        &self,
        resource_id: i64,
        error: &str,
        metadata: &str,
    ) -> Result<i64, DbError>;

    /// Deletes a revision row.
    async fn delete_revision(&self, id: i64) -> Result<(), DbError>;

    /// Reads the revisions of a resource, newest first.
    async fn list_revisions(&self, resource_id: i64) -> Result<Vec<RevisionRow>, DbError>;

    /// Reads the newest revision of a resource.
    async fn latest_revision(&self, resource_id: i64) -> Result<Option<RevisionRow>, DbError>;

    /// Returns whether any revision exists for a resource.
    async fn has_revisions(&self, resource_id: i64) -> Result<bool, DbError>;
}

/// SQLite implementation of [`ProjectStore`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the wrapped database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn load_properties(&self) -> Result<Vec<PropertyRow>, DbError> {
        let rows = sqlx::query_as::<_, PropertyRow>("SELECT name, value FROM project_property")
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows)
    }

    async fn load_resources(&self) -> Result<Vec<ResourceRow>, DbError> {
        let rows = sqlx::query_as::<_, ResourceRow>("SELECT id, url FROM resource ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows)
    }

    async fn load_root_resources(&self) -> Result<Vec<RootResourceRow>, DbError> {
        let rows = sqlx::query_as::<_, RootResourceRow>(
            "SELECT id, name, resource_id FROM root_resource ORDER BY id",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    async fn load_groups(&self) -> Result<Vec<GroupRow>, DbError> {
        let rows = sqlx::query_as::<_, GroupColumns>(
            "SELECT id, name, url_pattern, source_type, source_id FROM resource_group ORDER BY id",
        )
        .fetch_all(self.db.pool())
        .await?;
        rows.into_iter().map(GroupRow::try_from).collect()
    }

    #[instrument(skip(self, value))]
    async fn set_property(&self, name: &str, value: Option<&str>) -> Result<(), DbError> {
        match value {
            Some(value) => {
                sqlx::query(
                    r"INSERT INTO project_property (name, value) VALUES (?, ?)
                      ON CONFLICT(name) DO UPDATE SET value = excluded.value",
                )
                .bind(name)
                .bind(value)
                .execute(self.db.pool())
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM project_property WHERE name = ?")
                    .bind(name)
                    .execute(self.db.pool())
                    .await?;
            }
        }
        Ok(())
    }

    async fn insert_resource(&self, url: &str) -> Result<i64, DbError> {
        let result = sqlx::query("INSERT INTO resource (url) VALUES (?)")
            .bind(url)
            .execute(self.db.pool())
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_resource_url(&self, id: i64, url: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE resource SET url = ? WHERE id = ?")
            .bind(url)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn delete_resource(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM resource WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn insert_root_resource(&self, name: &str, resource_id: i64) -> Result<i64, DbError> {
        let result = sqlx::query("INSERT INTO root_resource (name, resource_id) VALUES (?, ?)")
            .bind(name)
            .bind(resource_id)
            .execute(self.db.pool())
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn delete_root_resource(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM root_resource WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn insert_group(
        &self,
        name: &str,
        url_pattern: &str,
        source: Option<(&str, i64)>,
    ) -> Result<i64, DbError> {
        let (source_type, source_id) = source.unzip();
        let result = sqlx::query(
            "INSERT INTO resource_group (name, url_pattern, source_type, source_id) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(url_pattern)
        .bind(source_type)
        .bind(source_id)
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn update_group_source(
        &self,
        id: i64,
        source: Option<(&str, i64)>,
    ) -> Result<(), DbError> {
        let (source_type, source_id) = source.unzip();
        sqlx::query("UPDATE resource_group SET source_type = ?, source_id = ? WHERE id = ?")
            .bind(source_type)
            .bind(source_id)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn delete_group(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM resource_group WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn insert_revision(
        &self,
        resource_id: i64,
        error: &str,
        metadata: &str,
    ) -> Result<i64, DbError> {
        let result = sqlx::query(
            "INSERT INTO resource_revision (resource_id, error, metadata) VALUES (?, ?, ?)",
        )
        .bind(resource_id)
        .bind(error)
        .bind(metadata)
        .execute(self.db.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn delete_revision(&self, id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM resource_revision WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn list_revisions(&self, resource_id: i64) -> Result<Vec<RevisionRow>, DbError> {
        let rows = sqlx::query_as::<_, RevisionRow>(
            "SELECT id, resource_id, error, metadata FROM resource_revision
             WHERE resource_id = ? ORDER BY id DESC",
        )
        .bind(resource_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    async fn latest_revision(&self, resource_id: i64) -> Result<Option<RevisionRow>, DbError> {
        let row = sqlx::query_as::<_, RevisionRow>(
            "SELECT id, resource_id, error, metadata FROM resource_revision
             WHERE resource_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(resource_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    async fn has_revisions(&self, resource_id: i64) -> Result<bool, DbError> {
        let (exists,): (i64,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM resource_revision WHERE resource_id = ?)",
        )
        .bind(resource_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(exists != 0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        SqliteStore::new(Database::new_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_set_property_upserts_and_deletes() {
        let store = store().await;

        store.set_property("default_url_prefix", Some("https://a/")).await.unwrap();
        store.set_property("default_url_prefix", Some("https://b/")).await.unwrap();
        let props = store.load_properties().await.unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].value.as_deref(), Some("https://b/"));

        store.set_property("default_url_prefix", None).await.unwrap();
        assert!(store.load_properties().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revisions_listed_newest_first() {
        let store = store().await;
        let rid = store.insert_resource("https://example.com/").await.unwrap();

        let first = store.insert_revision(rid, "null", "null").await.unwrap();
        let second = store.insert_revision(rid, "null", "null").await.unwrap();

        let ids: Vec<i64> = store
            .list_revisions(rid)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second, first]);
        assert_eq!(store.latest_revision(rid).await.unwrap().unwrap().id, second);
        assert!(store.has_revisions(rid).await.unwrap());
    }

    #[tokio::test]
    async fn test_group_source_round_trip() {
        let store = store().await;
        let gid = store
            .insert_group("Comics", "https://x/#", Some(("root_resource", 3)))
            .await
            .unwrap();
        store.update_group_source(gid, None).await.unwrap();

        let groups = store.load_groups().await.unwrap();
        assert_eq!(groups[0].source, None);
    }

    #[tokio::test]
    async fn test_partial_group_source_is_corrupt_row() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO resource_group (id, name, url_pattern, source_type) VALUES (7, 'X', 'x#', 'root_resource')",
        )
        .execute(store.database().pool())
        .await
        .unwrap();

        let err = store.load_groups().await.unwrap_err();
        assert!(matches!(
            err,
            DbError::CorruptRow { table: "resource_group", id: 7, .. }
        ));
    }
}
