use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::filter::FilterParseError;
use crate::storage::StorageError;

/// Coarse classification a host uses to pick its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is malformed.
    BadRequest,
    /// A referenced marker or entry does not exist.
    NotFound,
    /// The backend failed or timed out; the caller may retry.
    Unavailable,
    /// The operation is not offered by this source.
    Unsupported,
    /// An invariant of the feed was violated; not retryable.
    Fatal,
}

/// Request-level failures of the feed engine.
///
/// Every variant names the feed it concerns so hosts can log and respond
/// without re-deriving request context.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid request for feed '{feed}': {message}")]
    Validation { feed: String, message: String },

    #[error("Invalid category expression for feed '{feed}': {source}")]
    Filter {
        feed: String,
        #[source]
        source: FilterParseError,
    },

    #[error(
        "Invalid timestamp '{value}' for feed '{feed}': \
         expected an ISO-8601 instant such as 2014-03-10T00:00:00.000Z"
    )]
    InvalidTimestamp {
        feed: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Marker '{marker}' not found in feed '{feed}'")]
    MarkerNotFound { feed: String, marker: String },

    #[error("Entry '{entry_id}' not found in feed '{feed}'")]
    EntryNotFound { feed: String, entry_id: String },

    /// A forward scan from a timestamp found nothing at or after it.
    #[error("Forward scan of feed '{feed}' from {boundary} returned no entries")]
    ForwardUnderflow {
        feed: String,
        boundary: DateTime<Utc>,
    },

    #[error("Storage failure while reading feed '{feed}': {source}")]
    Storage {
        feed: String,
        #[source]
        source: StorageError,
    },

    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
}

impl FeedError {
    pub(crate) fn validation(feed: &str, message: impl Into<String>) -> Self {
        FeedError::Validation {
            feed: feed.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn storage(feed: &str) -> impl FnOnce(StorageError) -> Self + '_ {
        move |source| FeedError::Storage {
            feed: feed.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedError::Validation { .. }
            | FeedError::Filter { .. }
            | FeedError::InvalidTimestamp { .. } => ErrorKind::BadRequest,
            FeedError::MarkerNotFound { .. } | FeedError::EntryNotFound { .. } => {
                ErrorKind::NotFound
            }
            FeedError::Storage { .. } => ErrorKind::Unavailable,
            FeedError::Unsupported(_) => ErrorKind::Unsupported,
            FeedError::ForwardUnderflow { .. } => ErrorKind::Fatal,
        }
    }

    /// HTTP-equivalent status for the host framework.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Fatal => 500,
            ErrorKind::Unsupported => 501,
            ErrorKind::Unavailable => 503,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Feed the failed request was addressed to, when there was one.
    pub fn feed(&self) -> Option<&str> {
        match self {
            FeedError::Validation { feed, .. }
            | FeedError::Filter { feed, .. }
            | FeedError::InvalidTimestamp { feed, .. }
            | FeedError::MarkerNotFound { feed, .. }
            | FeedError::EntryNotFound { feed, .. }
            | FeedError::ForwardUnderflow { feed, .. }
            | FeedError::Storage { feed, .. } => Some(feed),
            FeedError::Unsupported(_) => None,
        }
    }
}
