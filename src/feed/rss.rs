use std::io::{BufReader, Read};

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};
use rss::Channel;

use super::{ParsedFeed, RawEntry, non_empty};

fn rfc2822(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::<FixedOffset>::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|d| d.to_utc())
}

fn rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::<FixedOffset>::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|d| d.to_utc())
}

pub fn parse<R: Read>(reader: R) -> anyhow::Result<ParsedFeed> {
    let channel = Channel::read_from(BufReader::new(reader)).context("failed to parse RSS feed")?;

    let entries = channel
        .items()
        .iter()
        .map(|item| {
            let dublin_core = item.dublin_core_ext();
            RawEntry {
                author: item
                    .author()
                    .and_then(non_empty)
                    .or_else(|| {
                        dublin_core
                            .and_then(|dc| dc.creators().first())
                            .and_then(|c| non_empty(c))
                    }),
                title: item.title().and_then(non_empty),
                link: item.link().and_then(non_empty),
                content: item.content().and_then(non_empty),
                description: item.description().and_then(non_empty),
                id: item.guid().and_then(|g| non_empty(g.value())),
                categories: item
                    .categories()
                    .iter()
                    .map(|c| c.name().trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect(),
                created: None,
                published: item.pub_date().and_then(rfc2822),
                updated: dublin_core
                    .and_then(|dc| dc.dates().first())
                    .and_then(|d| rfc3339(d)),
            }
        })
        .collect();

    Ok(ParsedFeed {
        updated: channel
            .last_build_date()
            .or(channel.pub_date())
            .and_then(rfc2822),
        entries,
    })
}
