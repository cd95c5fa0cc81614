mod entries;
mod memory;
mod schema;
mod types;

use std::future::Future;
use std::time::Duration;

pub use memory::MemoryStore;
pub use schema::SqliteStore;
pub use types::{Entry, EntryStore, RangeQuery, ScanOrder, SortKey, StorageError};

/// Run a storage call under a deadline.
///
/// Expiry drops the in-flight call and reports `StorageError::Timeout`;
/// no partial result escapes.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "Storage call timed out");
            Err(StorageError::Timeout(limit))
        }
    }
}
