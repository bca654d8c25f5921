use std::collections::HashSet;
use std::fmt::Write;

use chrono::Utc;

use super::{Fetched, ParsedFeed, RawEntry};
use crate::feed_source::FeedSource;
use crate::html;
use crate::webcache::{CacheUpdate, WebCache};

/// Lines that appeared in or vanished from a page between two snapshots.
#[derive(Debug, Default, PartialEq)]
pub struct TextDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl TextDiff {
    pub fn between(old: &str, new: &str) -> Self {
        let old_lines: HashSet<&str> = old.lines().map(str::trim).collect();
        let new_lines: HashSet<&str> = new.lines().map(str::trim).collect();
        Self {
            added: lines_missing_from(new, &old_lines),
            removed: lines_missing_from(old, &new_lines),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        if !self.added.is_empty() {
            out.push_str("<ul class=\"added\">\n");
            for line in &self.added {
                let _ = writeln!(out, "  <li>{}</li>", html::escape(line));
            }
            out.push_str("</ul>\n");
        }
        if !self.removed.is_empty() {
            out.push_str("<ul class=\"removed\">\n");
            for line in &self.removed {
                let _ = writeln!(out, "  <li><del>{}</del></li>", html::escape(line));
            }
            out.push_str("</ul>\n");
        }
        out
    }
}

fn lines_missing_from(text: &str, other: &HashSet<&str>) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !other.contains(line))
        .map(str::to_string)
        .collect()
}

/// Fetches a page and turns its changes since the cached snapshot into at most
/// one entry. The cache itself is left alone; the new snapshot is returned as
/// a pending update.
pub fn fetch(
    client: &reqwest::blocking::Client,
    source: &FeedSource,
    cache: &WebCache,
) -> anyhow::Result<Fetched> {
    let bytes = crate::http::get(client, &source.url)?;
    let page = String::from_utf8_lossy(&bytes);
    let previous = cache.get(&source.url)?;
    Ok(changes(source, &page, &previous))
}

fn changes(source: &FeedSource, page: &str, previous: &str) -> Fetched {
    let text = html::to_text(&html::body(page));
    let diff = TextDiff::between(previous, &text);
    let cache_update = Some(CacheUpdate {
        url: source.url.clone(),
        content: text,
    });
    if diff.is_empty() {
        log::info!("no changes on {}", source.url);
        return Fetched {
            feed: ParsedFeed::default(),
            cache_update,
        };
    }

    let entry = RawEntry {
        title: Some(html::title(page).unwrap_or_else(|| source.name.clone())),
        link: Some(source.url.clone()),
        content: Some(diff.to_html()),
        updated: Some(Utc::now()),
        ..RawEntry::default()
    };
    Fetched {
        feed: ParsedFeed {
            updated: None,
            entries: vec![entry],
        },
        cache_update,
    }
}
