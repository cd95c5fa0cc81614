use chrono::{DateTime, SubsecRound, Utc};
use std::time::Duration;

use super::request::{Direction, PageRequest};
use super::resolver::{resolve, Position, ResolvedPage};
use crate::error::FeedError;
use crate::filter::CategoryFilter;
use crate::storage::EntryStore;

/// Parse an ISO-8601 boundary such as `2014-03-10T00:00:00.000Z`.
///
/// Offsets are normalised to UTC and precision beyond milliseconds is
/// dropped, matching the resolution of the time index. Basic-format
/// instants (`20140306T060000`) are rejected.
pub fn parse_boundary(feed: &str, raw: &str) -> Result<DateTime<Utc>, FeedError> {
    let parsed = DateTime::parse_from_rfc3339(raw.trim()).map_err(|source| {
        FeedError::InvalidTimestamp {
            feed: feed.to_string(),
            value: raw.to_string(),
            source,
        }
    })?;
    Ok(parsed.with_timezone(&Utc).trunc_subsecs(3))
}

/// Fetch a page anchored at `boundary`.
///
/// A forward scan that finds nothing at or after the boundary is a fatal
/// inconsistency and fails with [`FeedError::ForwardUnderflow`]. A backward
/// scan may legitimately come back short or empty.
pub async fn fetch_by_timestamp<S: EntryStore>(
    store: &S,
    timeout: Duration,
    request: &PageRequest,
    boundary: DateTime<Utc>,
    filter: Option<CategoryFilter>,
) -> Result<ResolvedPage, FeedError> {
    let feed = request.feed_name.as_str();
    let plan = resolve(request, &Position::Timestamp(boundary), filter);
    let page = plan
        .execute(store, timeout)
        .await
        .map_err(FeedError::storage(feed))?;

    if request.direction == Direction::Forward && page.entries.is_empty() {
        tracing::error!(
            feed,
            boundary = %boundary,
            "Forward timestamp scan returned no entries"
        );
        return Err(FeedError::ForwardUnderflow {
            feed: feed.to_string(),
            boundary,
        });
    }

    Ok(page)
}
