use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::feed_source::{FeedSource, SourceKind};
use crate::filters::FilterRegistry;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_REDIRECTS: usize = 6;
const DEFAULT_MAX_CACHED: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("missing `{key}` in [general]")]
    MissingGeneral { key: &'static str },
    #[error("feed {section:?}: neither it nor [common] sets `{key}`")]
    MissingFeedKey { section: String, key: &'static str },
    #[error("feed {section:?}: invalid url {url:?}: {source}")]
    InvalidUrl {
        section: String,
        url: String,
        source: url::ParseError,
    },
    #[error("feed {section:?}: {reason}")]
    InvalidMaildir { section: String, reason: String },
    #[error("unknown filter {name:?} (known filters: {known})")]
    UnknownFilter { name: String, known: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    general: General,
    #[serde(default)]
    common: FeedSettings,
    /// In file order, which is also the order feeds are reported in.
    #[serde(default)]
    feeds: IndexMap<String, FeedSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct General {
    maildir_root: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    workers: Option<usize>,
    timeout: Option<u64>,
    max_redirects: Option<usize>,
}

/// Keys a feed section may set. Anything left unset falls back to `[common]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FeedSettings {
    url: Option<String>,
    name: Option<String>,
    maildir: Option<String>,
    maildir_template: Option<String>,
    keywords: Option<String>,
    filters: Option<String>,
    html: Option<bool>,
    #[serde(rename = "type")]
    kind: Option<SourceKind>,
    cached: Option<bool>,
    max_cached: Option<usize>,
}

impl FeedSettings {
    fn or(self, common: &FeedSettings) -> FeedSettings {
        let common = common.clone();
        FeedSettings {
            url: self.url.or(common.url),
            name: self.name.or(common.name),
            maildir: self.maildir.or(common.maildir),
            maildir_template: self.maildir_template.or(common.maildir_template),
            keywords: self.keywords.or(common.keywords),
            filters: self.filters.or(common.filters),
            html: self.html.or(common.html),
            kind: self.kind.or(common.kind),
            cached: self.cached.or(common.cached),
            max_cached: self.max_cached.or(common.max_cached),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub maildir_root: PathBuf,
    pub cache_dir: PathBuf,
    pub workers: usize,
    pub timeout: Duration,
    pub max_redirects: usize,
    pub feeds: Vec<FeedSource>,
}

impl Config {
    pub fn load(path: &Path, registry: &FilterRegistry) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::resolve(raw, registry)
    }

    #[cfg(test)]
    pub fn parse(text: &str, registry: &FilterRegistry) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::resolve(raw, registry)
    }

    fn resolve(raw: RawConfig, registry: &FilterRegistry) -> Result<Self, ConfigError> {
        let maildir_root = raw
            .general
            .maildir_root
            .map(|p| expand_home(&p))
            .ok_or(ConfigError::MissingGeneral {
                key: "maildir_root",
            })?;
        let cache_dir = raw
            .general
            .cache_dir
            .map(|p| expand_home(&p))
            .unwrap_or_else(default_cache_dir);

        let feeds = raw
            .feeds
            .into_iter()
            .map(|(section, settings)| resolve_feed(section, settings.or(&raw.common), registry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            maildir_root,
            cache_dir,
            workers: raw.general.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            timeout: Duration::from_secs(raw.general.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            max_redirects: raw.general.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
            feeds,
        })
    }
}

fn resolve_feed(
    section: String,
    settings: FeedSettings,
    registry: &FilterRegistry,
) -> Result<FeedSource, ConfigError> {
    let url = settings.url.unwrap_or_else(|| section.clone());
    let parsed = Url::parse(&url).map_err(|source| ConfigError::InvalidUrl {
        section: section.clone(),
        url: url.clone(),
        source,
    })?;
    let name = settings.name.unwrap_or_else(|| default_name(&parsed));

    let partition = match (settings.maildir, settings.maildir_template) {
        (Some(maildir), _) => maildir,
        (None, Some(template)) => template.replace("{}", &name),
        (None, None) => {
            return Err(ConfigError::MissingFeedKey {
                section,
                key: "maildir",
            });
        }
    };
    mailstore::validate_partition(&partition).map_err(|e| ConfigError::InvalidMaildir {
        section: section.clone(),
        reason: e.to_string(),
    })?;

    let filters = registry.resolve(&comma_list(settings.filters.as_deref()))?;
    let max_items = settings
        .cached
        .unwrap_or(false)
        .then(|| settings.max_cached.unwrap_or(DEFAULT_MAX_CACHED));

    Ok(FeedSource {
        url,
        name,
        partition,
        kind: settings.kind.unwrap_or_default(),
        keywords: comma_list(settings.keywords.as_deref())
            .into_iter()
            .collect::<BTreeSet<_>>(),
        filters,
        html: settings.html.unwrap_or(true),
        max_items,
    })
}

fn comma_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `host` plus path, with separators flattened, for feeds that set no name.
fn default_name(url: &Url) -> String {
    let raw = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
    raw.trim_end_matches('/')
        .chars()
        .map(|c| if c == '/' { '_' } else { c })
        .collect()
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feedmail")
        .join("web")
}

pub fn default_config_path() -> PathBuf {
    std::env::var("FEEDMAIL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("feedmail")
                .join("feedmail.toml")
        })
}
