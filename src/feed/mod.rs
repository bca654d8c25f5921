pub mod atom;
pub mod rss;
pub mod web;

use chrono::{DateTime, Utc};

use crate::feed_source::{FeedSource, SourceKind};
use crate::webcache::{CacheUpdate, WebCache};

/// One item as the source yielded it, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub author: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub content: Option<String>,
    pub description: Option<String>,
    pub id: Option<String>,
    pub categories: Vec<String>,
    pub created: Option<DateTime<Utc>>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    /// The feed's own last-updated time, the last resort for undated entries.
    pub updated: Option<DateTime<Utc>>,
    pub entries: Vec<RawEntry>,
}

/// The result of one fetch. Web sources also hand back the page snapshot that
/// should become the new cache baseline once the entries were delivered.
#[derive(Debug, Default)]
pub struct Fetched {
    pub feed: ParsedFeed,
    pub cache_update: Option<CacheUpdate>,
}

pub fn fetch(
    client: &reqwest::blocking::Client,
    source: &FeedSource,
    cache: &WebCache,
) -> anyhow::Result<Fetched> {
    match source.kind {
        SourceKind::Rss => {
            let bytes = crate::http::get(client, &source.url)?;
            Ok(Fetched {
                feed: parse(&bytes)?,
                cache_update: None,
            })
        }
        SourceKind::Web => web::fetch(client, source, cache),
    }
}

pub fn parse(bytes: &[u8]) -> anyhow::Result<ParsedFeed> {
    let text = String::from_utf8_lossy(bytes);

    if text.contains("<rss") {
        rss::parse(bytes)
    } else {
        atom::parse(bytes)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| value.to_string())
}
