use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::types::{Entry, EntryStore, RangeQuery, ScanOrder, SortKey, StorageError};

#[derive(Debug, Default)]
struct Partition {
    by_key: BTreeMap<SortKey, Entry>,
    by_id: HashMap<String, SortKey>,
}

/// In-process entry store with the same ordering and filtering semantics
/// as the SQLite store. Each feed is a `BTreeMap` keyed by
/// `(timestamp, entry_id)`, so range scans are native map ranges.
///
/// Category filters are evaluated directly against entry categories.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    feeds: Arc<RwLock<HashMap<String, Partition>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with entries.
    pub fn with_entries<I: IntoIterator<Item = Entry>>(entries: I) -> Self {
        let store = Self::new();
        if let Ok(mut feeds) = store.feeds.write() {
            for entry in entries {
                insert(&mut feeds, entry);
            }
        }
        store
    }

    fn poisoned() -> StorageError {
        StorageError::Corrupt("memory store lock poisoned".to_string())
    }
}

fn insert(feeds: &mut HashMap<String, Partition>, entry: Entry) {
    let partition = feeds.entry(entry.feed.clone()).or_default();
    let key = entry.sort_key();
    if let Some(previous) = partition.by_id.insert(entry.entry_id.clone(), key.clone()) {
        partition.by_key.remove(&previous);
    }
    partition.by_key.insert(key, entry);
}

impl EntryStore for MemoryStore {
    async fn query(&self, query: &RangeQuery) -> Result<Vec<Entry>, StorageError> {
        if query.limit == Some(0) || query.is_empty_range() {
            return Ok(Vec::new());
        }

        let feeds = self.feeds.read().map_err(|_| Self::poisoned())?;
        let Some(partition) = feeds.get(&query.feed) else {
            return Ok(Vec::new());
        };

        let range = partition
            .by_key
            .range((query.lower.clone(), query.upper.clone()))
            .map(|(_, entry)| entry);
        let matching = |entry: &&Entry| {
            query
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(&entry.categories))
        };
        let limit = query.limit.unwrap_or(usize::MAX);

        let entries = match query.order {
            ScanOrder::Ascending => range.filter(matching).take(limit).cloned().collect(),
            ScanOrder::Descending => range.rev().filter(matching).take(limit).cloned().collect(),
        };
        Ok(entries)
    }

    async fn get(&self, feed: &str, entry_id: &str) -> Result<Option<Entry>, StorageError> {
        let feeds = self.feeds.read().map_err(|_| Self::poisoned())?;
        Ok(feeds.get(feed).and_then(|partition| {
            partition
                .by_id
                .get(entry_id)
                .and_then(|key| partition.by_key.get(key))
                .cloned()
        }))
    }

    async fn put(&self, entry: &Entry) -> Result<(), StorageError> {
        let mut feeds = self.feeds.write().map_err(|_| Self::poisoned())?;
        insert(&mut feeds, entry.clone());
        Ok(())
    }
}
