use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::future::Future;
use std::ops::Bound;
use std::time::Duration;
use thiserror::Error;

use crate::filter::CategoryFilter;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer failures, surfaced to callers as retryable backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The query did not complete within the configured bound
    #[error("Storage query timed out after {0:?}")]
    Timeout(Duration),

    /// The backend is locked or throttling requests
    #[error("Storage is busy: {0}")]
    Busy(String),

    /// Schema creation failed
    #[error("Storage migration failed: {0}")]
    Migration(String),

    /// A stored row could not be converted into an entry
    #[error("Corrupt entry data: {0}")]
    Corrupt(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Classify a sqlx error, mapping lock contention to `Busy`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5) and SQLITE_LOCKED (6) are transient contention,
        // the local equivalent of a throttled backend.
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return StorageError::Busy(err.to_string());
        }

        if matches!(err, sqlx::Error::PoolTimedOut) {
            return StorageError::Busy("connection pool exhausted".to_string());
        }

        StorageError::Database(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A persisted feed entry.
///
/// Timestamps are kept at millisecond precision, the resolution of the
/// time-ordered index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub feed: String,
    pub entry_id: String,
    pub entry_body: String,
    pub timestamp: DateTime<Utc>,
    pub categories: Vec<String>,
}

impl Entry {
    pub fn new(
        feed: impl Into<String>,
        entry_id: impl Into<String>,
        entry_body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            feed: feed.into(),
            entry_id: entry_id.into(),
            entry_body: entry_body.into(),
            timestamp: timestamp.trunc_subsecs(3),
            categories: Vec::new(),
        }
    }

    pub fn with_categories<I, C>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Position of this entry in its feed's total order.
    pub fn sort_key(&self) -> SortKey {
        SortKey::new(self.timestamp, &self.entry_id)
    }
}

/// Key of the time-ordered secondary index: `(timestamp, entry_id)`.
///
/// The empty entry id sorts before every real id, so
/// `SortKey::floor(ts)` is the first possible key at `ts`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortKey {
    pub millis: i64,
    pub entry_id: String,
}

impl SortKey {
    pub fn new(timestamp: DateTime<Utc>, entry_id: &str) -> Self {
        Self {
            millis: timestamp.timestamp_millis(),
            entry_id: entry_id.to_string(),
        }
    }

    /// Smallest key carrying the given timestamp.
    pub fn floor(timestamp: DateTime<Utc>) -> Self {
        Self {
            millis: timestamp.timestamp_millis(),
            entry_id: String::new(),
        }
    }

    /// Smallest key strictly after every key carrying the given timestamp.
    pub fn ceiling(timestamp: DateTime<Utc>) -> Self {
        Self {
            millis: timestamp.timestamp_millis().saturating_add(1),
            entry_id: String::new(),
        }
    }
}

/// Scan order over the time index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    Ascending,
    Descending,
}

/// A range query against one feed partition of the time index.
#[derive(Debug, Clone)]
pub struct RangeQuery {
    pub feed: String,
    pub lower: Bound<SortKey>,
    pub upper: Bound<SortKey>,
    pub order: ScanOrder,
    pub limit: Option<usize>,
    pub filter: Option<CategoryFilter>,
}

impl RangeQuery {
    /// Unbounded ascending scan of a whole feed.
    pub fn feed(feed: impl Into<String>) -> Self {
        Self {
            feed: feed.into(),
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            order: ScanOrder::Ascending,
            limit: None,
            filter: None,
        }
    }

    pub fn lower(mut self, bound: Bound<SortKey>) -> Self {
        self.lower = bound;
        self
    }

    pub fn upper(mut self, bound: Bound<SortKey>) -> Self {
        self.upper = bound;
        self
    }

    pub fn order(mut self, order: ScanOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filter(mut self, filter: Option<CategoryFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// True when the bounds cannot contain any key.
    pub fn is_empty_range(&self) -> bool {
        let (lo, lo_inclusive) = match &self.lower {
            Bound::Unbounded => return false,
            Bound::Included(key) => (key, true),
            Bound::Excluded(key) => (key, false),
        };
        let (hi, hi_inclusive) = match &self.upper {
            Bound::Unbounded => return false,
            Bound::Included(key) => (key, true),
            Bound::Excluded(key) => (key, false),
        };
        lo > hi || (lo == hi && !(lo_inclusive && hi_inclusive))
    }
}

// ============================================================================
// Store Interface
// ============================================================================

/// A partitioned, time-indexed entry store.
///
/// Results of `query` are ordered by `(timestamp, entry_id)` in the requested
/// direction and never exceed `limit`.
pub trait EntryStore: Clone + Send + Sync + 'static {
    fn query(
        &self,
        query: &RangeQuery,
    ) -> impl Future<Output = Result<Vec<Entry>, StorageError>> + Send;

    fn get(
        &self,
        feed: &str,
        entry_id: &str,
    ) -> impl Future<Output = Result<Option<Entry>, StorageError>> + Send;

    /// Insert or replace an entry keyed by `(feed, entry_id)`.
    fn put(&self, entry: &Entry) -> impl Future<Output = Result<(), StorageError>> + Send;
}
