use chrono::DateTime;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::ops::Bound;

use super::schema::SqliteStore;
use super::types::{Entry, EntryStore, RangeQuery, ScanOrder, SortKey, StorageError};
use crate::config::StorageLayout;

// ============================================================================
// Row Mapping
// ============================================================================

/// Internal row type for entry queries (used by sqlx FromRow).
/// Converts to `Entry` via `into_entry()` once categories are attached.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub id: i64,
    pub feed: String,
    pub entry_id: String,
    pub entry_body: String,
    pub created_at: i64,
}

impl EntryRow {
    pub(crate) fn into_entry(self, categories: Vec<String>) -> Result<Entry, StorageError> {
        let timestamp = DateTime::from_timestamp_millis(self.created_at).ok_or_else(|| {
            StorageError::Corrupt(format!(
                "entry '{}' in feed '{}' has out-of-range timestamp {}",
                self.entry_id, self.feed, self.created_at
            ))
        })?;
        Ok(Entry {
            feed: self.feed,
            entry_id: self.entry_id,
            entry_body: self.entry_body,
            timestamp,
            categories,
        })
    }
}

const SELECT_ENTRIES: &str =
    "SELECT e.id, e.feed, e.entry_id, e.entry_body, e.created_at FROM entries e WHERE e.feed = ";

// ============================================================================
// Query Building
// ============================================================================

fn push_lower_bound(builder: &mut QueryBuilder<'_, Sqlite>, bound: &Bound<SortKey>) {
    let (key, id_op) = match bound {
        Bound::Unbounded => return,
        Bound::Included(key) => (key, " AND e.entry_id >= "),
        Bound::Excluded(key) => (key, " AND e.entry_id > "),
    };
    builder
        .push(" AND (e.created_at > ")
        .push_bind(key.millis)
        .push(" OR (e.created_at = ")
        .push_bind(key.millis)
        .push(id_op)
        .push_bind(key.entry_id.clone())
        .push("))");
}

fn push_upper_bound(builder: &mut QueryBuilder<'_, Sqlite>, bound: &Bound<SortKey>) {
    let (key, id_op) = match bound {
        Bound::Unbounded => return,
        Bound::Included(key) => (key, " AND e.entry_id <= "),
        Bound::Excluded(key) => (key, " AND e.entry_id < "),
    };
    builder
        .push(" AND (e.created_at < ")
        .push_bind(key.millis)
        .push(" OR (e.created_at = ")
        .push_bind(key.millis)
        .push(id_op)
        .push_bind(key.entry_id.clone())
        .push("))");
}

/// Lower-cased value for a prefix column, taken from the first category
/// whose prefix maps to it.
fn column_value(layout: &StorageLayout, categories: &[String], column: &str) -> Option<String> {
    categories
        .iter()
        .filter_map(|category| layout.split(category))
        .find(|(mapped, _)| *mapped == column)
        .map(|(_, value)| value.to_lowercase())
}

// ============================================================================
// Entry Operations
// ============================================================================

impl SqliteStore {
    async fn run_query(&self, query: &RangeQuery) -> Result<Vec<Entry>, StorageError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_ENTRIES);
        builder.push_bind(query.feed.clone());
        push_lower_bound(&mut builder, &query.lower);
        push_upper_bound(&mut builder, &query.upper);

        if let Some(filter) = &query.filter {
            builder.push(" AND ");
            filter.to_sql(&self.layout).push_to(&mut builder);
        }

        match query.order {
            ScanOrder::Ascending => builder.push(" ORDER BY e.created_at ASC, e.entry_id ASC"),
            ScanOrder::Descending => builder.push(" ORDER BY e.created_at DESC, e.entry_id DESC"),
        };

        if let Some(limit) = query.limit {
            builder
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows: Vec<EntryRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        self.attach_categories(rows).await
    }

    /// Load categories for a batch of rows in one query.
    async fn attach_categories(&self, rows: Vec<EntryRow>) -> Result<Vec<Entry>, StorageError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT entry_pk, term FROM entry_categories WHERE entry_pk IN (");
        let mut separated = builder.separated(", ");
        for row in &rows {
            separated.push_bind(row.id);
        }
        separated.push_unseparated(") ORDER BY entry_pk, position");

        let pairs: Vec<(i64, String)> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from_sqlx)?;
        let mut by_entry: HashMap<i64, Vec<String>> = HashMap::new();
        for (entry_pk, term) in pairs {
            by_entry.entry(entry_pk).or_default().push(term);
        }

        rows.into_iter()
            .map(|row| {
                let categories = by_entry.remove(&row.id).unwrap_or_default();
                row.into_entry(categories)
            })
            .collect()
    }

    async fn fetch_entry(&self, feed: &str, entry_id: &str) -> Result<Option<Entry>, StorageError> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT e.id, e.feed, e.entry_id, e.entry_body, e.created_at
            FROM entries e
            WHERE e.feed = ? AND e.entry_id = ?
        "#,
        )
        .bind(feed)
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from_sqlx)?;

        match row {
            Some(row) => Ok(self.attach_categories(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// Upsert the entry row, then replace its category rows.
    async fn write_entry(&self, entry: &Entry) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT INTO entries (feed, entry_id, entry_body, created_at");
        for (_, column) in self.layout.columns() {
            builder.push(format!(", \"{column}\""));
        }
        builder.push(") VALUES (");
        let mut values = builder.separated(", ");
        values.push_bind(entry.feed.clone());
        values.push_bind(entry.entry_id.clone());
        values.push_bind(entry.entry_body.clone());
        values.push_bind(entry.timestamp.timestamp_millis());
        for (_, column) in self.layout.columns() {
            values.push_bind(column_value(&self.layout, &entry.categories, column));
        }
        values.push_unseparated(")");

        builder.push(
            " ON CONFLICT(feed, entry_id) DO UPDATE SET \
             entry_body = excluded.entry_body, created_at = excluded.created_at",
        );
        for (_, column) in self.layout.columns() {
            builder.push(format!(", \"{column}\" = excluded.\"{column}\""));
        }
        builder.push(" RETURNING id");

        let (entry_pk,): (i64,) = builder.build_query_as().fetch_one(&mut *tx).await?;

        sqlx::query("DELETE FROM entry_categories WHERE entry_pk = ?")
            .bind(entry_pk)
            .execute(&mut *tx)
            .await?;

        if !entry.categories.is_empty() {
            let mut insert: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO entry_categories (entry_pk, position, term, term_lc) ",
            );
            insert.push_values(entry.categories.iter().enumerate(), |mut b, (position, term)| {
                b.push_bind(entry_pk)
                    .push_bind(position as i64)
                    .push_bind(term.clone())
                    .push_bind(term.to_lowercase());
            });
            insert.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

impl EntryStore for SqliteStore {
    async fn query(&self, query: &RangeQuery) -> Result<Vec<Entry>, StorageError> {
        if query.limit == Some(0) || query.is_empty_range() {
            return Ok(Vec::new());
        }

        tracing::debug!(
            feed = %query.feed,
            order = ?query.order,
            limit = ?query.limit,
            filtered = query.filter.is_some(),
            "Entry range query"
        );

        self.run_query(query).await
    }

    async fn get(&self, feed: &str, entry_id: &str) -> Result<Option<Entry>, StorageError> {
        self.fetch_entry(feed, entry_id).await
    }

    async fn put(&self, entry: &Entry) -> Result<(), StorageError> {
        self.write_entry(entry)
            .await
            .map_err(StorageError::from_sqlx)
    }
}

// ============================================================================
// Tests
// ============================================================================
