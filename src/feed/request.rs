use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::config::EngineConfig;
use crate::error::FeedError;

// ============================================================================
// Direction
// ============================================================================

/// Which way a page extends from its anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Toward newer entries.
    Forward,
    /// Toward older entries.
    Backward,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" => Ok(Direction::Forward),
            "backward" => Ok(Direction::Backward),
            _ => Err(format!(
                "unknown direction '{s}', expected 'forward' or 'backward'"
            )),
        }
    }
}

// ============================================================================
// Host Requests
// ============================================================================

/// A feed page request as handed over by the host framework: raw,
/// unvalidated strings straight from the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetFeedRequest {
    pub feed_name: String,
    pub page_size: Option<String>,
    pub direction: Option<String>,
    pub marker: Option<String>,
    pub search: Option<String>,
    pub starting_at: Option<String>,
}

impl GetFeedRequest {
    pub fn new(feed_name: impl Into<String>) -> Self {
        Self {
            feed_name: feed_name.into(),
            ..Self::default()
        }
    }

    pub fn with_page_size(mut self, page_size: impl Into<String>) -> Self {
        self.page_size = Some(page_size.into());
        self
    }

    pub fn with_direction(mut self, direction: impl Into<String>) -> Self {
        self.direction = Some(direction.into());
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_starting_at(mut self, starting_at: impl Into<String>) -> Self {
        self.starting_at = Some(starting_at.into());
        self
    }
}

/// A single-entry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetEntryRequest {
    pub feed_name: String,
    pub entry_id: String,
}

impl GetEntryRequest {
    pub fn new(feed_name: impl Into<String>, entry_id: impl Into<String>) -> Self {
        Self {
            feed_name: feed_name.into(),
            entry_id: entry_id.into(),
        }
    }
}

// ============================================================================
// Validated Page Request
// ============================================================================

/// Where a page is anchored, before resolution against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    /// No marker: the start of the feed going forward, its head going
    /// backward.
    Edge,
    /// An entry id; the page excludes it.
    Marker(String),
    /// A raw ISO-8601 boundary; parsed by the timestamp fetcher.
    Timestamp(String),
}

/// A validated page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub feed_name: String,
    pub page_size: usize,
    pub direction: Direction,
    pub anchor: Anchor,
    pub category_expression: Option<String>,
}

impl PageRequest {
    /// Validate a host request.
    ///
    /// Blank parameters count as absent. Without a direction the request
    /// reads backward, so a bare request returns the feed head.
    pub fn from_request(
        request: &GetFeedRequest,
        config: &EngineConfig,
    ) -> Result<Self, FeedError> {
        let feed = request.feed_name.as_str();
        validate_feed_name(feed)?;

        let page_size = match non_blank(&request.page_size) {
            None => config.default_page_size(),
            Some(raw) => {
                let parsed = raw.parse::<usize>().map_err(|_| {
                    FeedError::validation(
                        feed,
                        format!("page size '{raw}' is not a positive integer"),
                    )
                })?;
                check_page_size(feed, parsed, config)?
            }
        };

        let direction = match non_blank(&request.direction) {
            None => Direction::Backward,
            Some(raw) => raw
                .parse::<Direction>()
                .map_err(|message| FeedError::validation(feed, message))?,
        };

        let anchor = match (non_blank(&request.marker), non_blank(&request.starting_at)) {
            (Some(_), Some(_)) => {
                return Err(FeedError::validation(
                    feed,
                    "marker and starting_at cannot be combined",
                ));
            }
            (Some(marker), None) => Anchor::Marker(marker.to_string()),
            (None, Some(boundary)) => Anchor::Timestamp(boundary.to_string()),
            (None, None) => Anchor::Edge,
        };

        Ok(Self {
            feed_name: request.feed_name.clone(),
            page_size,
            direction,
            anchor,
            category_expression: non_blank(&request.search).map(str::to_string),
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
}

/// Feed names are `namespace/feed`.
pub(crate) fn validate_feed_name(feed: &str) -> Result<(), FeedError> {
    match feed.split_once('/') {
        Some((namespace, name))
            if !namespace.trim().is_empty()
                && !name.trim().is_empty()
                && !name.contains('/') =>
        {
            Ok(())
        }
        _ => Err(FeedError::validation(
            feed,
            "feed name must have the form 'namespace/feed'",
        )),
    }
}

pub(crate) fn check_page_size(
    feed: &str,
    page_size: usize,
    config: &EngineConfig,
) -> Result<usize, FeedError> {
    if page_size == 0 {
        return Err(FeedError::validation(
            feed,
            "page size must be greater than zero",
        ));
    }
    if page_size > config.max_page_size() {
        return Err(FeedError::validation(
            feed,
            format!(
                "page size {page_size} exceeds the maximum of {}",
                config.max_page_size()
            ),
        ));
    }
    Ok(page_size)
}
