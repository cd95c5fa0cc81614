//! Cursor-paginated feed query engine over a time-indexed entry store.
//!
//! [`FeedSource`] answers page requests for `namespace/feed` feeds: it
//! validates the request, compiles any category expression, resolves the
//! marker or timestamp into range queries against an [`EntryStore`], and
//! returns an oldest-first page with its navigation links.

pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod storage;

pub use config::{Config, ConfigError, EngineConfig};
pub use error::{ErrorKind, FeedError};
pub use feed::{Direction, FeedPage, FeedSource, GetEntryRequest, GetFeedRequest};
pub use storage::{Entry, EntryStore, MemoryStore, SqliteStore, StorageError};
