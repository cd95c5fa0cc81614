//! Feed pagination: request validation, cursor resolution, timestamp
//! paging and link building, fronted by [`FeedSource`].

mod links;
mod request;
mod resolver;
mod source;
mod timestamp;

use serde::Serialize;

use crate::storage::Entry;

pub use links::{build_links, FeedMetadata, Links};
pub use request::{Anchor, Direction, GetEntryRequest, GetFeedRequest, PageRequest};
pub use resolver::{resolve, Opposite, Position, QueryPlan, ResolvedPage};
pub use source::FeedSource;
pub use timestamp::{fetch_by_timestamp, parse_boundary};

/// One page of a feed, entries oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub feed: String,
    pub direction: Direction,
    pub entries: Vec<Entry>,
    pub has_more: bool,
    pub next_marker: Option<String>,
    pub previous_marker: Option<String>,
    pub links: Links,
}
