use chrono::{DateTime, Utc};
use std::ops::Bound;
use std::time::Duration;

use super::request::{Direction, PageRequest};
use crate::filter::CategoryFilter;
use crate::storage::{
    with_timeout, Entry, EntryStore, RangeQuery, ScanOrder, SortKey, StorageError,
};

/// A page anchor resolved to index keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// Start of the feed going forward, head of the feed going backward.
    Edge,
    /// Strictly past an existing entry.
    Marker(SortKey),
    /// At a timestamp: inclusive going forward, exclusive of anything
    /// later going backward.
    Timestamp(DateTime<Utc>),
}

/// Whether anything exists on the far side of the anchor.
#[derive(Debug, Clone)]
pub enum Opposite {
    /// Nothing can: the anchor is a feed edge.
    Empty,
    /// A one-row query that answers the question.
    Scan(RangeQuery),
}

/// The storage work needed to serve one page.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub direction: Direction,
    pub page_size: usize,
    /// Fetches one row past the page so `has_more` needs no second query.
    pub query: RangeQuery,
    pub opposite: Opposite,
}

/// A page in chronological order with its navigation markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPage {
    pub entries: Vec<Entry>,
    /// More entries exist past this page in the requested direction.
    pub has_more: bool,
    /// Id of the newest entry, when newer entries exist.
    pub next_marker: Option<String>,
    /// Id of the oldest entry, when older entries exist.
    pub previous_marker: Option<String>,
    /// Older entries exist in the live feed, whether or not this page has
    /// an entry to carry `previous_marker`.
    pub has_older: bool,
}

/// Turn a validated request and its resolved anchor into a query plan.
///
/// Forward pages scan ascending from the anchor, backward pages scan
/// descending and are reversed once fetched, so both come back oldest
/// first.
pub fn resolve(
    request: &PageRequest,
    position: &Position,
    filter: Option<CategoryFilter>,
) -> QueryPlan {
    let feed = request.feed_name.as_str();

    // (page bound, opposite bound) on the side of the anchor each one covers
    let (page_bound, opposite_bound) = match (request.direction, position) {
        (_, Position::Edge) => (Bound::Unbounded, None),
        (_, Position::Marker(key)) => (
            Bound::Excluded(key.clone()),
            Some(Bound::Included(key.clone())),
        ),
        (Direction::Forward, Position::Timestamp(ts)) => (
            Bound::Included(SortKey::floor(*ts)),
            Some(Bound::Excluded(SortKey::floor(*ts))),
        ),
        (Direction::Backward, Position::Timestamp(ts)) => (
            Bound::Excluded(SortKey::ceiling(*ts)),
            Some(Bound::Included(SortKey::ceiling(*ts))),
        ),
    };

    let base = RangeQuery::feed(feed).filter(filter);
    let (query, opposite) = match request.direction {
        Direction::Forward => (
            base.clone()
                .lower(page_bound)
                .order(ScanOrder::Ascending),
            opposite_bound.map(|bound| base.upper(bound).order(ScanOrder::Descending)),
        ),
        Direction::Backward => (
            base.clone()
                .upper(page_bound)
                .order(ScanOrder::Descending),
            opposite_bound.map(|bound| base.lower(bound).order(ScanOrder::Ascending)),
        ),
    };

    QueryPlan {
        direction: request.direction,
        page_size: request.page_size,
        query: query.limit(request.page_size.saturating_add(1)),
        opposite: match opposite {
            Some(scan) => Opposite::Scan(scan.limit(1)),
            None => Opposite::Empty,
        },
    }
}

impl QueryPlan {
    /// Run the page query and the opposite-side check concurrently, each
    /// under `timeout`.
    pub async fn execute<S: EntryStore>(
        &self,
        store: &S,
        timeout: Duration,
    ) -> Result<ResolvedPage, StorageError> {
        let page = with_timeout(timeout, store.query(&self.query));
        let opposite = async {
            match &self.opposite {
                Opposite::Empty => Ok(false),
                Opposite::Scan(scan) => with_timeout(timeout, store.query(scan))
                    .await
                    .map(|rows| !rows.is_empty()),
            }
        };

        let (rows, opposite_exists) = futures::future::try_join(page, opposite).await?;
        tracing::debug!(
            feed = %self.query.feed,
            direction = %self.direction,
            rows = rows.len(),
            opposite_exists,
            "Executed page plan"
        );
        Ok(self.shape(rows, opposite_exists))
    }

    /// Trim the look-ahead row, restore chronological order and derive the
    /// navigation markers.
    ///
    /// An empty page carries no markers.
    pub fn shape(&self, mut rows: Vec<Entry>, opposite_exists: bool) -> ResolvedPage {
        let has_more = rows.len() > self.page_size;
        rows.truncate(self.page_size);
        if self.direction == Direction::Backward {
            rows.reverse();
        }

        let (newer_exist, older_exist) = match self.direction {
            Direction::Forward => (has_more, opposite_exists),
            Direction::Backward => (opposite_exists, has_more),
        };

        ResolvedPage {
            next_marker: newer_exist
                .then(|| rows.last().map(|e| e.entry_id.clone()))
                .flatten(),
            previous_marker: older_exist
                .then(|| rows.first().map(|e| e.entry_id.clone()))
                .flatten(),
            entries: rows,
            has_more,
            has_older: older_exist,
        }
    }
}
