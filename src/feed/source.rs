use std::collections::HashMap;
use std::sync::Arc;

use super::links::{build_links, FeedMetadata};
use super::request::{
    check_page_size, validate_feed_name, Anchor, Direction, GetEntryRequest, GetFeedRequest,
    PageRequest,
};
use super::resolver::{resolve, Position};
use super::timestamp::{self, parse_boundary};
use super::FeedPage;
use crate::config::{Config, ConfigError, EngineConfig};
use crate::error::FeedError;
use crate::filter::{compile, CategoryFilter};
use crate::storage::{with_timeout, Entry, EntryStore, SortKey};

/// Read side of the feed engine.
///
/// Stateless between requests: every call is answered from the store and
/// the immutable configuration, so a `FeedSource` can be cloned freely and
/// shared across tasks.
#[derive(Debug, Clone)]
pub struct FeedSource<S> {
    store: S,
    config: Arc<EngineConfig>,
}

impl<S: EntryStore> FeedSource<S> {
    /// Validate `config` and build a source over `store`.
    pub fn new(store: S, config: &Config) -> Result<Self, ConfigError> {
        let engine = config.validate()?;
        Ok(Self::from_engine_config(store, engine))
    }

    pub fn from_engine_config(store: S, config: EngineConfig) -> Self {
        tracing::info!(
            default_page_size = config.default_page_size(),
            max_page_size = config.max_page_size(),
            timeout_ms = config.query_timeout().as_millis() as u64,
            "Feed source ready"
        );
        Self {
            store,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Serve one page of a feed.
    pub async fn get_feed_page(&self, request: &GetFeedRequest) -> Result<FeedPage, FeedError> {
        let page_request = PageRequest::from_request(request, &self.config)
            .map_err(|e| rejected(&request.feed_name, e))?;
        self.page(page_request).await
    }

    /// Serve a page anchored at an ISO-8601 timestamp.
    pub async fn fetch_by_timestamp(
        &self,
        feed_name: &str,
        boundary: &str,
        direction: Direction,
        page_size: usize,
    ) -> Result<FeedPage, FeedError> {
        let checked = validate_feed_name(feed_name)
            .and_then(|()| check_page_size(feed_name, page_size, &self.config));
        let page_size = checked.map_err(|e| rejected(feed_name, e))?;

        self.page(PageRequest {
            feed_name: feed_name.to_string(),
            page_size,
            direction,
            anchor: Anchor::Timestamp(boundary.to_string()),
            category_expression: None,
        })
        .await
    }

    /// Look up a single entry by id.
    pub async fn get_entry(&self, request: &GetEntryRequest) -> Result<Entry, FeedError> {
        let feed = request.feed_name.as_str();
        validate_feed_name(feed).map_err(|e| rejected(feed, e))?;

        let found = with_timeout(
            self.config.query_timeout(),
            self.store.get(feed, &request.entry_id),
        )
        .await
        .map_err(FeedError::storage(feed))?;

        found.ok_or_else(|| FeedError::EntryNotFound {
            feed: feed.to_string(),
            entry_id: request.entry_id.clone(),
        })
    }

    /// Runtime parameter overrides are not offered; configuration is fixed
    /// at construction.
    pub fn set_parameters(&self, params: &HashMap<String, String>) -> Result<(), FeedError> {
        tracing::warn!(
            keys = ?params.keys().collect::<Vec<_>>(),
            "Rejected runtime parameter update"
        );
        Err(FeedError::Unsupported("set_parameters"))
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn page(&self, request: PageRequest) -> Result<FeedPage, FeedError> {
        let feed = request.feed_name.as_str();

        // Malformed boundaries fail before anything touches the store.
        let boundary = match &request.anchor {
            Anchor::Timestamp(raw) => {
                Some(parse_boundary(feed, raw).map_err(|e| rejected(feed, e))?)
            }
            Anchor::Edge | Anchor::Marker(_) => None,
        };
        let filter = self
            .compile_filter(&request)
            .map_err(|e| rejected(feed, e))?;

        let resolved = match (&request.anchor, boundary) {
            (_, Some(boundary)) => {
                timestamp::fetch_by_timestamp(
                    &self.store,
                    self.config.query_timeout(),
                    &request,
                    boundary,
                    filter,
                )
                .await?
            }
            (Anchor::Marker(marker), None) => {
                let key = self.marker_key(feed, marker).await?;
                resolve(&request, &Position::Marker(key), filter)
                    .execute(&self.store, self.config.query_timeout())
                    .await
                    .map_err(FeedError::storage(feed))?
            }
            (_, None) => resolve(&request, &Position::Edge, filter)
                .execute(&self.store, self.config.query_timeout())
                .await
                .map_err(FeedError::storage(feed))?,
        };

        let metadata = FeedMetadata::for_feed(&self.config, feed)?;
        let links = build_links(&resolved, &request, &metadata);

        tracing::debug!(
            feed,
            direction = %request.direction,
            entries = resolved.entries.len(),
            has_more = resolved.has_more,
            "Served feed page"
        );

        Ok(FeedPage {
            feed: request.feed_name.clone(),
            direction: request.direction,
            entries: resolved.entries,
            has_more: resolved.has_more,
            next_marker: resolved.next_marker,
            previous_marker: resolved.previous_marker,
            links,
        })
    }

    fn compile_filter(&self, request: &PageRequest) -> Result<Option<CategoryFilter>, FeedError> {
        match &request.category_expression {
            None => Ok(None),
            Some(expression) => compile(expression).map_err(|source| FeedError::Filter {
                feed: request.feed_name.clone(),
                source,
            }),
        }
    }

    /// Resolve a marker id to its index key.
    async fn marker_key(&self, feed: &str, marker: &str) -> Result<SortKey, FeedError> {
        let entry = with_timeout(self.config.query_timeout(), self.store.get(feed, marker))
            .await
            .map_err(FeedError::storage(feed))?;

        match entry {
            Some(entry) => Ok(entry.sort_key()),
            None => {
                tracing::debug!(feed, marker, "Marker not found");
                Err(FeedError::MarkerNotFound {
                    feed: feed.to_string(),
                    marker: marker.to_string(),
                })
            }
        }
    }
}

/// Log a request rejected before any storage work.
fn rejected(feed: &str, err: FeedError) -> FeedError {
    tracing::warn!(feed, error = %err, "Rejected feed request");
    err
}
