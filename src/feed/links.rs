use serde::Serialize;
use url::Url;

use super::request::{Anchor, Direction, PageRequest};
use super::resolver::ResolvedPage;
use crate::config::EngineConfig;
use crate::error::FeedError;

/// Where a feed and its archive live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedMetadata {
    pub feed_url: Url,
    pub archive_url: Option<Url>,
}

impl FeedMetadata {
    pub fn new(feed_url: Url, archive_url: Option<Url>) -> Self {
        Self {
            feed_url,
            archive_url,
        }
    }

    /// Metadata for `feed` served under the configured base URL.
    pub fn for_feed(config: &EngineConfig, feed: &str) -> Result<Self, FeedError> {
        let feed_url = config
            .base_url()
            .join(&format!("{feed}/"))
            .map_err(|e| FeedError::validation(feed, format!("cannot build feed URL: {e}")))?;
        Ok(Self::new(feed_url, config.archive_url(feed).cloned()))
    }
}

/// Navigation links of a page, in Atom `rel` terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Links {
    #[serde(rename = "self")]
    pub self_link: Url,
    /// The feed head.
    pub current: Url,
    pub next: Option<Url>,
    pub previous: Option<Url>,
    /// The oldest page of the feed.
    pub last: Url,
    #[serde(rename = "next-archive")]
    pub archive: Option<Url>,
}

/// Build the links of a page. Pure: depends only on its arguments.
///
/// `next` and `previous` appear only when the page carries the matching
/// marker. The archive link appears once the live feed has nothing older
/// to offer and the feed has an archive configured; an empty page past
/// the newest entry still has older entries and gets no archive link.
pub fn build_links(page: &ResolvedPage, request: &PageRequest, metadata: &FeedMetadata) -> Links {
    let search = request.category_expression.as_deref();

    let self_link = {
        let mut url = metadata.feed_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            match &request.anchor {
                Anchor::Edge => {}
                Anchor::Marker(marker) => {
                    pairs.append_pair("marker", marker);
                }
                Anchor::Timestamp(boundary) => {
                    pairs.append_pair("starting_at", boundary);
                }
            }
            pairs.append_pair("direction", request.direction.as_str());
            pairs.append_pair("limit", &request.page_size.to_string());
            if let Some(search) = search {
                pairs.append_pair("search", search);
            }
        }
        url
    };

    let page_link = |marker: Option<&str>, direction: Direction| {
        let mut url = metadata.feed_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(marker) = marker {
                pairs.append_pair("marker", marker);
            }
            pairs.append_pair("direction", direction.as_str());
            pairs.append_pair("limit", &request.page_size.to_string());
            if let Some(search) = search {
                pairs.append_pair("search", search);
            }
        }
        url
    };

    Links {
        self_link,
        current: metadata.feed_url.clone(),
        next: page
            .next_marker
            .as_deref()
            .map(|marker| page_link(Some(marker), Direction::Forward)),
        previous: page
            .previous_marker
            .as_deref()
            .map(|marker| page_link(Some(marker), Direction::Backward)),
        last: page_link(None, Direction::Forward),
        archive: if page.has_older {
            None
        } else {
            metadata.archive_url.clone()
        },
    }
}
