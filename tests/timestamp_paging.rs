//! Integration tests for timestamp-anchored pages over the SQLite store.

use chrono::{DateTime, Duration, TimeZone, Utc};
use feedpager::config::Config;
use feedpager::feed::{Direction, FeedPage, FeedSource, GetFeedRequest};
use feedpager::storage::{Entry, EntryStore, SqliteStore};
use feedpager::FeedError;
use pretty_assertions::assert_eq;

const FEED: &str = "namespace/feed";
const BOUNDARY: &str = "2014-03-10T00:00:00.000Z";

fn boundary() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 3, 10, 0, 0, 0).unwrap()
}

async fn source_with(entries: &[Entry]) -> FeedSource<SqliteStore> {
    let engine = Config::default().validate().unwrap();
    let store = SqliteStore::open(":memory:", engine.layout()).await.unwrap();
    for entry in entries {
        store.put(entry).await.unwrap();
    }
    FeedSource::from_engine_config(store, engine)
}

fn entry_at(id: &str, offset: Duration) -> Entry {
    Entry::new(FEED, id, "<entry/>", boundary() + offset)
}

fn ids(page: &FeedPage) -> Vec<&str> {
    page.entries.iter().map(|e| e.entry_id.as_str()).collect()
}

#[tokio::test]
async fn test_backward_single_entry_before_boundary() {
    let source = source_with(&[entry_at("101", Duration::hours(-1))]).await;

    let page = source
        .fetch_by_timestamp(FEED, BOUNDARY, Direction::Backward, 25)
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["101"]);
    assert!(!page.has_more);
    assert_eq!(page.previous_marker, None);
}

#[tokio::test]
async fn test_forward_without_entries_after_boundary_is_fatal() {
    let source = source_with(&[entry_at("101", Duration::hours(-1))]).await;

    let err = source
        .fetch_by_timestamp(FEED, BOUNDARY, Direction::Forward, 25)
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::ForwardUnderflow { .. }));
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn test_malformed_boundary_rejected_in_both_directions() {
    let source = source_with(&[entry_at("101", Duration::hours(-1))]).await;

    for direction in [Direction::Forward, Direction::Backward] {
        let err = source
            .fetch_by_timestamp(FEED, "20140306T060000", direction, 25)
            .await
            .unwrap_err();
        assert!(
            matches!(err, FeedError::InvalidTimestamp { .. }),
            "{direction} should reject the basic format"
        );
    }
}

#[tokio::test]
async fn test_boundary_is_inclusive_in_both_directions() {
    let source = source_with(&[
        entry_at("100", Duration::seconds(-1)),
        entry_at("101", Duration::zero()),
        entry_at("102", Duration::seconds(1)),
    ])
    .await;

    let forward = source
        .fetch_by_timestamp(FEED, BOUNDARY, Direction::Forward, 25)
        .await
        .unwrap();
    assert_eq!(ids(&forward), vec!["101", "102"]);
    assert_eq!(forward.previous_marker.as_deref(), Some("101"));

    let backward = source
        .fetch_by_timestamp(FEED, BOUNDARY, Direction::Backward, 25)
        .await
        .unwrap();
    assert_eq!(ids(&backward), vec!["100", "101"]);
    assert_eq!(backward.next_marker.as_deref(), Some("101"));
}

#[tokio::test]
async fn test_starting_at_on_a_page_request() {
    let entries: Vec<Entry> = (0..6)
        .map(|i| entry_at(&format!("10{i}"), Duration::minutes(i)))
        .collect();
    let source = source_with(&entries).await;

    let page = source
        .get_feed_page(
            &GetFeedRequest::new(FEED)
                .with_starting_at("2014-03-10T00:02:00Z")
                .with_direction("forward")
                .with_page_size("2"),
        )
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["102", "103"]);
    assert!(page.has_more);
    assert!(page
        .links
        .self_link
        .as_str()
        .contains("starting_at=2014-03-10T00%3A02%3A00Z"));

    // the returned marker continues the walk
    let next = source
        .get_feed_page(
            &GetFeedRequest::new(FEED)
                .with_marker(page.next_marker.unwrap())
                .with_direction("forward")
                .with_page_size("2"),
        )
        .await
        .unwrap();
    assert_eq!(ids(&next), vec!["104", "105"]);
    assert!(!next.has_more);
}

#[tokio::test]
async fn test_offset_boundary_is_normalised() {
    let source = source_with(&[entry_at("101", Duration::zero())]).await;

    let page = source
        .fetch_by_timestamp(FEED, "2014-03-10T05:30:00+05:30", Direction::Forward, 25)
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["101"]);
}
