use std::collections::BTreeSet;

use chrono::{DateTime, Timelike, Utc};
use itertools::Itertools;
use mailstore::{Fingerprinted, digest};

use crate::feed::RawEntry;
use crate::feed_source::FeedSource;

/// A feed item in canonical form, ready for the novelty check.
///
/// Filters may rewrite any public field; the fingerprints are recomputed from
/// `raw_id`, `title` and `content` after the pipeline ran.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub author: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub content: String,
    pub raw_id: Option<String>,
    pub categories: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    /// Set by filters that know a better Message-ID than a generated one.
    pub message_id: Option<String>,
    content_fingerprint: String,
    identity_fingerprint: Option<String>,
}

/// Digest of the id if it has any non-blank text, else of the title, else nothing.
pub fn identity_fingerprint(raw_id: Option<&str>, title: Option<&str>) -> Option<String> {
    [raw_id, title]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(|s| digest(s.as_bytes()))
}

pub fn content_fingerprint(content: &str) -> String {
    digest(content.as_bytes())
}

fn whole_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_nanosecond(0).unwrap_or(ts)
}

impl FeedEntry {
    pub fn from_raw(raw: RawEntry, feed_updated: Option<DateTime<Utc>>) -> Self {
        let created_at = raw
            .created
            .or(raw.published)
            .or(raw.updated)
            .or(feed_updated)
            .unwrap_or_else(Utc::now);
        let content = raw
            .content
            .or(raw.description)
            .unwrap_or_default()
            .replace('\u{a0}', " ");
        let title = raw
            .title
            .map(|t| t.split_whitespace().join(" "))
            .filter(|t| !t.is_empty());

        let mut entry = Self {
            author: raw.author,
            title,
            link: raw.link,
            content,
            raw_id: raw.id,
            categories: raw.categories.into_iter().collect(),
            created_at,
            message_id: None,
            content_fingerprint: String::new(),
            identity_fingerprint: None,
        };
        entry.refresh_fingerprints();
        entry
    }

    pub fn refresh_fingerprints(&mut self) {
        self.created_at = whole_seconds(self.created_at);
        self.content_fingerprint = content_fingerprint(&self.content);
        self.identity_fingerprint =
            identity_fingerprint(self.raw_id.as_deref(), self.title.as_deref());
    }

    pub fn content_fingerprint(&self) -> &str {
        &self.content_fingerprint
    }

    pub fn identity_fingerprint(&self) -> Option<&str> {
        self.identity_fingerprint.as_deref()
    }
}

impl Fingerprinted for FeedEntry {
    fn identity(&self) -> Option<&str> {
        self.identity_fingerprint()
    }

    fn content(&self) -> &str {
        self.content_fingerprint()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Builds the canonical entry for `raw`, merges the feed's keywords and runs its
/// filters. `None` means a filter dropped the entry.
pub fn normalize(
    raw: RawEntry,
    feed_updated: Option<DateTime<Utc>>,
    source: &FeedSource,
) -> Option<FeedEntry> {
    let mut entry = FeedEntry::from_raw(raw, feed_updated);
    entry.categories.extend(source.keywords.iter().cloned());

    let link = entry.link.clone();
    match source.filters.apply(entry) {
        Some(mut entry) => {
            entry.refresh_fingerprints();
            Some(entry)
        }
        None => {
            log::warn!(
                "{}: filters dropped {}",
                source.name,
                link.as_deref().unwrap_or("an entry without link")
            );
            None
        }
    }
}
