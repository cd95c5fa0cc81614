use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::types::StorageError;
use crate::config::StorageLayout;

// ============================================================================
// SQLite Store
// ============================================================================

/// Entry store backed by SQLite.
///
/// Entries live in one table partitioned by `feed`, with the secondary index
/// `idx_entries_feed_time (feed, created_at, entry_id)` providing the
/// per-feed total order every page query scans.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
    pub(crate) layout: Arc<StorageLayout>,
}

impl SqliteStore {
    /// Open (creating if needed) a database and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database on a single
    /// connection, since every SQLite connection to `:memory:` is a
    /// separate database.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Busy` if the database is locked by another
    /// process, `StorageError::Migration` if schema creation fails.
    pub async fn open(path: &str, layout: &StorageLayout) -> Result<Self, StorageError> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks before
        // returning SQLITE_BUSY. Applied to every pooled connection.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::from_sqlx)?;

        let store = Self {
            pool,
            layout: Arc::new(layout.clone()),
        };
        store.migrate().await.map_err(|e| match StorageError::from_sqlx(e) {
            busy @ StorageError::Busy(_) => busy,
            other => StorageError::Migration(other.to_string()),
        })?;

        tracing::debug!(
            path = %path,
            prefix_columns = layout.columns().count(),
            "Opened entry store"
        );
        Ok(store)
    }

    /// Run migrations atomically within a transaction.
    ///
    /// All statements are idempotent, so re-running on an existing database
    /// is a no-op. Prefix columns missing from an older database are added.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                feed TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                entry_body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(feed, entry_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Time-ordered secondary index: every page scan is a range over
        // (feed, created_at, entry_id).
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_feed_time
             ON entries(feed, created_at, entry_id)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entry_categories (
                entry_pk INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                term TEXT NOT NULL,
                term_lc TEXT NOT NULL,
                PRIMARY KEY(entry_pk, position)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entry_categories_term
             ON entry_categories(term_lc, entry_pk)",
        )
        .execute(&mut *tx)
        .await?;

        let existing: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('entries')")
                .fetch_all(&mut *tx)
                .await?;

        // Column names are plain identifiers (see `validate_layout`).
        for (prefix, column) in self.layout.columns() {
            let present = existing
                .iter()
                .any(|(name,)| name.eq_ignore_ascii_case(column));
            if !present {
                tracing::info!(prefix = %prefix, column = %column, "Adding prefix column");
                sqlx::query(&format!("ALTER TABLE entries ADD COLUMN \"{column}\" TEXT"))
                    .execute(&mut *tx)
                    .await?;
            }
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS \"idx_entries_{column}\" ON entries(feed, \"{column}\")"
            ))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn tenant_layout() -> StorageLayout {
        let mut map = BTreeMap::new();
        map.insert("tid".to_string(), "tenant_id".to_string());
        StorageLayout::new(":", map).unwrap()
    }

    async fn column_names(store: &SqliteStore) -> Vec<String> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info('entries')")
            .fetch_all(&store.pool)
            .await
            .unwrap();
        rows.into_iter().map(|(name,)| name).collect()
    }

    #[tokio::test]
    async fn test_open_in_memory_creates_schema() {
        let store = SqliteStore::open(":memory:", &StorageLayout::default())
            .await
            .unwrap();
        let columns = column_names(&store).await;
        assert_eq!(
            columns,
            vec!["id", "feed", "entry_id", "entry_body", "created_at"]
        );
    }

    #[tokio::test]
    async fn test_prefix_columns_added() {
        let store = SqliteStore::open(":memory:", &tenant_layout()).await.unwrap();
        let columns = column_names(&store).await;
        assert!(columns.contains(&"tenant_id".to_string()));
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = SqliteStore::open(":memory:", &tenant_layout()).await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
        let columns = column_names(&store).await;
        assert_eq!(columns.iter().filter(|c| *c == "tenant_id").count(), 1);
    }

    #[tokio::test]
    async fn test_time_index_exists() {
        let store = SqliteStore::open(":memory:", &StorageLayout::default())
            .await
            .unwrap();
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND name = 'idx_entries_feed_time'",
        )
        .fetch_optional(&store.pool)
        .await
        .unwrap();
        assert!(row.is_some());
    }
}
