use std::collections::BTreeSet;

use serde::Deserialize;

use crate::filters::Pipeline;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// An RSS or Atom document.
    #[default]
    Rss,
    /// Any web page; changes between fetches become entries.
    Web,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rss => "rss",
            SourceKind::Web => "web",
        }
    }
}

/// A configured feed, resolved once at startup and read-only afterwards.
#[derive(Debug, Clone)]
pub struct FeedSource {
    pub url: String,
    pub name: String,
    pub partition: String,
    pub kind: SourceKind,
    pub keywords: BTreeSet<String>,
    pub filters: Pipeline,
    pub html: bool,
    pub max_items: Option<usize>,
}
