use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use anyhow::Context;
use chrono::{DateTime, Utc};
use mailstore::{Fingerprinted, Maildir, lock};
use rayon::prelude::*;

use crate::config::Config;
use crate::entry::normalize;
use crate::feed::{self, Fetched, ParsedFeed};
use crate::feed_source::FeedSource;
use crate::message;
use crate::webcache::WebCache;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FeedStats {
    pub delivered: usize,
    pub skipped: usize,
    pub dropped: usize,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FeedOutcome {
    Done(FeedStats),
    Failed(String),
}

/// What a pull did, feed by feed.
#[derive(Debug, Default)]
pub(crate) struct RunSummary {
    pub feeds: usize,
    pub totals: FeedStats,
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    fn record(&mut self, name: &str, outcome: FeedOutcome) {
        self.feeds += 1;
        match outcome {
            FeedOutcome::Done(stats) => {
                self.totals.delivered += stats.delivered;
                self.totals.skipped += stats.skipped;
                self.totals.dropped += stats.dropped;
            }
            FeedOutcome::Failed(reason) => self.failures.push((name.to_string(), reason)),
        }
    }

    pub fn first_failure(&self) -> Option<&(String, String)> {
        self.failures.first()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} feeds: {} delivered, {} already seen, {} dropped",
            self.feeds, self.totals.delivered, self.totals.skipped, self.totals.dropped
        )?;
        if !self.failures.is_empty() {
            let names: Vec<&str> = self.failures.iter().map(|(n, _)| n.as_str()).collect();
            write!(f, "; {} failed: {}", names.len(), names.join(", "))?;
        }
        Ok(())
    }
}

/// Shared, read-only state of one run.
struct Pull<'a> {
    store: &'a Maildir,
    cache: &'a WebCache,
    client: &'a reqwest::blocking::Client,
    host: &'a str,
    rundate: DateTime<Utc>,
}

pub(crate) fn cmd_pull(config: &Config, workers: usize) -> anyhow::Result<RunSummary> {
    let store = Maildir::open(&config.maildir_root)?;
    let cache = WebCache::new(&config.cache_dir);
    let client = crate::http::http_client(config.timeout, config.max_redirects)?;
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let pull = Pull {
        store: &store,
        cache: &cache,
        client: &client,
        host: &host,
        rundate: Utc::now(),
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .context("failed to start worker pool")?;

    let outcomes: Vec<FeedOutcome> = pool.install(|| {
        config
            .feeds
            .par_iter()
            .map(|source| run_feed(&pull, source))
            .collect()
    });

    let mut summary = RunSummary::default();
    for (source, outcome) in config.feeds.iter().zip(outcomes) {
        summary.record(&source.name, outcome);
    }
    Ok(summary)
}

/// Runs one feed to completion. Errors and panics stay confined to this feed.
fn run_feed(pull: &Pull<'_>, source: &FeedSource) -> FeedOutcome {
    match panic::catch_unwind(AssertUnwindSafe(|| process_feed(pull, source))) {
        Ok(Ok(stats)) => {
            log::info!(
                "{}: {} delivered, {} already seen, {} dropped",
                source.name,
                stats.delivered,
                stats.skipped,
                stats.dropped
            );
            FeedOutcome::Done(stats)
        }
        Ok(Err(e)) => {
            log::warn!("{}: {:#}", source.name, e);
            FeedOutcome::Failed(format!("{:#}", e))
        }
        Err(payload) => {
            let reason = format!("panicked: {}", panic_message(payload.as_ref()));
            log::error!("{}: {}", source.name, reason);
            FeedOutcome::Failed(reason)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

fn process_feed(pull: &Pull<'_>, source: &FeedSource) -> anyhow::Result<FeedStats> {
    pull.store.create(&source.partition)?;
    let fetched = feed::fetch(pull.client, source, pull.cache)
        .with_context(|| format!("failed to fetch {}", source.url))?;
    deliver_fetched(pull, source, fetched)
}

/// Delivers the novel entries of one fetch. A web snapshot only becomes the new
/// baseline if every entry made it through rendering.
fn deliver_fetched(
    pull: &Pull<'_>,
    source: &FeedSource,
    fetched: Fetched,
) -> anyhow::Result<FeedStats> {
    let ParsedFeed { updated, entries } = fetched.feed;

    let handle = pull.store.index().partition(&source.partition);
    let mut stats = FeedStats::default();
    let mut render_failed = false;

    for raw in entries.into_iter().take(source.max_items.unwrap_or(usize::MAX)) {
        let Some(entry) = normalize(raw, updated, source) else {
            stats.dropped += 1;
            continue;
        };
        let label = entry
            .title
            .clone()
            .or_else(|| entry.link.clone())
            .unwrap_or_else(|| "untitled entry".to_string());

        let mut partition = lock(&handle);
        if !partition.is_novel(&entry) {
            log::info!("{}: already delivered {}", source.name, label);
            stats.skipped += 1;
            continue;
        }
        let previous = entry
            .identity()
            .and_then(|identity| partition.get(identity))
            .and_then(|record| message::message_id_of(&record.path));
        let rendered = message::render(
            &entry,
            source,
            pull.host,
            pull.rundate,
            previous.as_deref(),
        );
        let message = match rendered {
            Ok(message) => message,
            Err(e) => {
                log::warn!("{}: dropping {}: {:#}", source.name, label, e);
                stats.dropped += 1;
                render_failed = true;
                continue;
            }
        };
        pull.store
            .deliver(&mut partition, &entry, message.as_bytes())
            .with_context(|| format!("failed to deliver {}", label))?;
        stats.delivered += 1;
    }

    if let Some(update) = fetched.cache_update {
        if render_failed {
            log::warn!(
                "{}: keeping the previous snapshot of {}",
                source.name,
                update.url
            );
        } else {
            update.commit(pull.cache)?;
        }
    }
    Ok(stats)
}
