//! Integration tests for marker-based paging over the SQLite store.
//!
//! Each test creates its own in-memory SQLite database for isolation and
//! drives it through `FeedSource`, the way a host would.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, TimeZone, Utc};
use feedpager::config::{Config, FeedSettings};
use feedpager::feed::{Direction, FeedPage, FeedSource, GetFeedRequest};
use feedpager::storage::{Entry, EntryStore, SqliteStore};
use feedpager::{ErrorKind, FeedError};
use pretty_assertions::assert_eq;

const FEED: &str = "namespace/feed";
const ARCHIVE_LINK: &str = "http://archive.com/namespace/feed/archive";

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 3, 10, 0, 0, 0).unwrap()
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.feeds.insert(
        FEED.to_string(),
        FeedSettings {
            archive_url: Some(ARCHIVE_LINK.to_string()),
        },
    );
    config
}

async fn source_with(config: &Config, entries: &[Entry]) -> FeedSource<SqliteStore> {
    let engine = config.validate().unwrap();
    let store = SqliteStore::open(":memory:", engine.layout()).await.unwrap();
    for entry in entries {
        store.put(entry).await.unwrap();
    }
    FeedSource::from_engine_config(store, engine)
}

/// `count` entries one minute apart, ids "100", "101", ...
fn minute_entries(count: usize) -> Vec<Entry> {
    (0..count)
        .map(|i| {
            Entry::new(
                FEED,
                format!("{}", 100 + i),
                format!("<entry><id>{}</id></entry>", 100 + i),
                base_time() + Duration::minutes(i as i64),
            )
        })
        .collect()
}

fn ids(page: &FeedPage) -> Vec<String> {
    page.entries.iter().map(|e| e.entry_id.clone()).collect()
}

// ============================================================================
// Walking Tests
// ============================================================================

#[tokio::test]
async fn test_backward_walk_visits_every_entry_once() {
    let entries = minute_entries(23);
    let source = source_with(&test_config(), &entries).await;

    let mut seen = Vec::new();
    let mut request = GetFeedRequest::new(FEED).with_page_size("5");
    let mut pages = 0;
    loop {
        let page = source.get_feed_page(&request).await.unwrap();
        pages += 1;
        // each page is chronological, the walk itself goes back in time
        let mut batch = ids(&page);
        batch.append(&mut seen);
        seen = batch;

        match page.previous_marker {
            Some(marker) => {
                assert!(page.links.previous.is_some());
                assert_eq!(page.links.archive, None);
                request = GetFeedRequest::new(FEED)
                    .with_page_size("5")
                    .with_direction("backward")
                    .with_marker(marker);
            }
            None => {
                assert_eq!(page.links.archive.unwrap().as_str(), ARCHIVE_LINK);
                break;
            }
        }
    }

    let expected: Vec<String> = entries.iter().map(|e| e.entry_id.clone()).collect();
    assert_eq!(seen, expected);
    assert_eq!(pages, 5);
}

#[tokio::test]
async fn test_forward_walk_visits_every_entry_once() {
    let entries = minute_entries(12);
    let source = source_with(&test_config(), &entries).await;

    let mut seen = Vec::new();
    let mut request = GetFeedRequest::new(FEED)
        .with_page_size("4")
        .with_direction("forward");
    loop {
        let page = source.get_feed_page(&request).await.unwrap();
        seen.extend(ids(&page));
        match page.next_marker {
            Some(marker) => {
                request = GetFeedRequest::new(FEED)
                    .with_page_size("4")
                    .with_direction("forward")
                    .with_marker(marker);
            }
            None => {
                assert!(!page.has_more);
                break;
            }
        }
    }

    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), seen.len());
    let expected: Vec<String> = entries.iter().map(|e| e.entry_id.clone()).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_entries_sharing_a_timestamp_are_not_skipped() {
    let entries: Vec<Entry> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|id| Entry::new(FEED, *id, "<entry/>", base_time()))
        .collect();
    let source = source_with(&test_config(), &entries).await;

    let first = source
        .get_feed_page(
            &GetFeedRequest::new(FEED)
                .with_page_size("2")
                .with_direction("forward"),
        )
        .await
        .unwrap();
    assert_eq!(ids(&first), vec!["a", "b"]);

    let second = source
        .get_feed_page(
            &GetFeedRequest::new(FEED)
                .with_page_size("2")
                .with_direction("forward")
                .with_marker(first.next_marker.unwrap()),
        )
        .await
        .unwrap();
    assert_eq!(ids(&second), vec!["c", "d"]);
}

#[tokio::test]
async fn test_refetch_is_identical() {
    let source = source_with(&test_config(), &minute_entries(10)).await;
    let request = GetFeedRequest::new(FEED)
        .with_page_size("3")
        .with_direction("backward")
        .with_marker("107");

    let first = source.get_feed_page(&request).await.unwrap();
    let second = source.get_feed_page(&request).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(ids(&first), vec!["104", "105", "106"]);
}

// ============================================================================
// Edge Cases
// ============================================================================

#[tokio::test]
async fn test_empty_feed_head() {
    let source = source_with(&test_config(), &[]).await;
    let page = source.get_feed_page(&GetFeedRequest::new(FEED)).await.unwrap();
    assert!(page.entries.is_empty());
    assert!(!page.has_more);
    assert_eq!(page.next_marker, None);
    assert_eq!(page.previous_marker, None);
    assert_eq!(page.direction, Direction::Backward);
}

#[tokio::test]
async fn test_forward_past_newest_has_no_archive_link() {
    let source = source_with(&test_config(), &minute_entries(5)).await;

    let page = source
        .get_feed_page(
            &GetFeedRequest::new(FEED)
                .with_marker("104")
                .with_direction("forward"),
        )
        .await
        .unwrap();
    assert!(page.entries.is_empty());
    assert_eq!(page.previous_marker, None);
    assert_eq!(page.links.archive, None);
}

#[tokio::test]
async fn test_marker_from_another_feed_is_not_found() {
    let mut entries = minute_entries(3);
    entries.push(Entry::new("namespace/other", "999", "<entry/>", base_time()));
    let source = source_with(&test_config(), &entries).await;

    let err = source
        .get_feed_page(&GetFeedRequest::new(FEED).with_marker("999"))
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::MarkerNotFound { .. }));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let source = source_with(&test_config(), &minute_entries(3)).await;

    for request in [
        GetFeedRequest::new("no-namespace"),
        GetFeedRequest::new(FEED).with_page_size("0"),
        GetFeedRequest::new(FEED).with_page_size("5000"),
        GetFeedRequest::new(FEED).with_direction("up"),
        GetFeedRequest::new(FEED)
            .with_marker("100")
            .with_starting_at("2014-03-10T00:00:00.000Z"),
        GetFeedRequest::new(FEED).with_search("(XOR(cat=a))"),
    ] {
        let err = source.get_feed_page(&request).await.unwrap_err();
        assert_eq!(err.status_code(), 400, "{request:?} should be a bad request");
    }
}

// ============================================================================
// Category Filter Tests
// ============================================================================

#[tokio::test]
async fn test_category_filters_against_sqlite() {
    let entries = vec![
        Entry::new(FEED, "100", "<entry/>", base_time()).with_categories(["Cat1"]),
        Entry::new(FEED, "101", "<entry/>", base_time() + Duration::minutes(1))
            .with_categories(["Cat2"]),
        Entry::new(FEED, "102", "<entry/>", base_time() + Duration::minutes(2))
            .with_categories(["cat1", "CAT2"]),
        Entry::new(FEED, "103", "<entry/>", base_time() + Duration::minutes(3)),
    ];
    let source = source_with(&test_config(), &entries).await;

    let cases = [
        ("+Cat1", vec!["100", "102"]),
        ("+Cat1+Cat2", vec!["102"]),
        ("(AND(cat=CAT1)(cat=cat2))", vec!["102"]),
        ("(OR(cat=cat1)(cat=cat2))", vec!["100", "101", "102"]),
        ("(NOT(cat=CAT1))", vec!["101", "103"]),
    ];
    for (search, expected) in cases {
        let page = source
            .get_feed_page(&GetFeedRequest::new(FEED).with_search(search))
            .await
            .unwrap();
        assert_eq!(ids(&page), expected, "search {search}");
    }
}

#[tokio::test]
async fn test_prefixed_categories_use_their_column() {
    let mut config = test_config();
    config.delimiter = ":".to_string();
    config.prefix_column_map = BTreeMap::from([("tid".to_string(), "tenant_id".to_string())]);

    let entries = vec![
        Entry::new(FEED, "100", "<entry/>", base_time()).with_categories(["tid:1234"]),
        Entry::new(FEED, "101", "<entry/>", base_time() + Duration::minutes(1))
            .with_categories(["TID:5678", "cat1"]),
        Entry::new(FEED, "102", "<entry/>", base_time() + Duration::minutes(2))
            .with_categories(["cat1"]),
    ];
    let source = source_with(&config, &entries).await;

    let tenant = source
        .get_feed_page(&GetFeedRequest::new(FEED).with_search("+tid:1234"))
        .await
        .unwrap();
    assert_eq!(ids(&tenant), vec!["100"]);

    let mixed = source
        .get_feed_page(&GetFeedRequest::new(FEED).with_search("(AND(cat=tid:5678)(cat=cat1))"))
        .await
        .unwrap();
    assert_eq!(ids(&mixed), vec!["101"]);

    let others = source
        .get_feed_page(&GetFeedRequest::new(FEED).with_search("(NOT(cat=tid:1234))"))
        .await
        .unwrap();
    assert_eq!(ids(&others), vec!["101", "102"]);
}

#[tokio::test]
async fn test_filtered_walk_follows_markers() {
    let entries: Vec<Entry> = minute_entries(10)
        .into_iter()
        .enumerate()
        .map(|(i, e)| if i % 2 == 0 { e.with_categories(["even"]) } else { e })
        .collect();
    let source = source_with(&test_config(), &entries).await;

    let head = source
        .get_feed_page(&GetFeedRequest::new(FEED).with_page_size("2").with_search("+even"))
        .await
        .unwrap();
    assert_eq!(ids(&head), vec!["106", "108"]);
    assert!(head.links.previous.as_ref().unwrap().as_str().contains("search=%2Beven"));

    let older = source
        .get_feed_page(
            &GetFeedRequest::new(FEED)
                .with_page_size("2")
                .with_direction("backward")
                .with_marker(head.previous_marker.unwrap())
                .with_search("+even"),
        )
        .await
        .unwrap();
    assert_eq!(ids(&older), vec!["102", "104"]);
    assert_eq!(older.next_marker.as_deref(), Some("104"));
}
