use anyhow::ensure;

use crate::config::Config;
use crate::feed_source::FeedSource;

fn format_feed(feed: &FeedSource) -> String {
    format!(
        "{} [{}] -> {} ({})",
        feed.name,
        feed.kind.as_str(),
        feed.partition,
        feed.url
    )
}

pub(crate) fn cmd_feeds(config: &Config) -> anyhow::Result<()> {
    ensure!(!config.feeds.is_empty(), "No feeds configured");
    let mut feeds: Vec<&FeedSource> = config.feeds.iter().collect();
    feeds.sort_by(|a, b| a.name.cmp(&b.name));
    for feed in feeds {
        println!("{}", format_feed(feed));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed_source::SourceKind;

    #[test]
    fn test_format_feed() {
        let feed = FeedSource {
            url: "https://example.com/news".to_string(),
            name: "news".to_string(),
            partition: "feeds.news".to_string(),
            kind: SourceKind::Web,
            keywords: Default::default(),
            filters: Default::default(),
            html: true,
            max_items: None,
        };
        assert_eq!(
            format_feed(&feed),
            "news [web] -> feeds.news (https://example.com/news)"
        );
    }
}
