use std::io::{BufReader, Read};

use anyhow::Context;
use atom_syndication::{Entry, Feed, FixedDateTime};
use chrono::{DateTime, Utc};

use super::{ParsedFeed, RawEntry, non_empty};

fn link(entry: &Entry) -> Option<String> {
    entry
        .links()
        .iter()
        .find(|l| l.rel() == "alternate")
        .or_else(|| entry.links().first())
        .and_then(|l| non_empty(l.href()))
}

/// atom_syndication fills a missing date with the Unix epoch; treat that as absent.
fn timestamp(date: &FixedDateTime) -> Option<DateTime<Utc>> {
    (date.timestamp() != 0).then(|| date.to_utc())
}

pub fn parse<R: Read>(reader: R) -> anyhow::Result<ParsedFeed> {
    let feed = Feed::read_from(BufReader::new(reader)).context("failed to parse Atom feed")?;

    let entries = feed
        .entries()
        .iter()
        .map(|entry| RawEntry {
            author: entry.authors().first().and_then(|a| non_empty(a.name())),
            title: non_empty(entry.title().as_str()),
            link: link(entry),
            content: entry
                .content()
                .and_then(|c| c.value())
                .and_then(non_empty),
            description: entry.summary().and_then(|s| non_empty(s.as_str())),
            id: non_empty(entry.id()),
            categories: entry
                .categories()
                .iter()
                .map(|c| c.term().trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            created: None,
            published: entry.published().and_then(timestamp),
            updated: timestamp(entry.updated()),
        })
        .collect();

    Ok(ParsedFeed {
        updated: timestamp(feed.updated()),
        entries,
    })
}
