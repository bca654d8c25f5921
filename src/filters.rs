use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::config::ConfigError;
use crate::entry::FeedEntry;
use crate::html;

/// A named pipeline step: returns the (possibly rewritten) entry, or `None` to drop it.
pub type Filter = Arc<dyn Fn(FeedEntry) -> Option<FeedEntry> + Send + Sync>;

/// Filters that configuration can refer to by name.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Filter>,
}

impl FilterRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register("addurl", addurl);
        registry.register("arxiv", arxiv);
        registry.register("blogger", blogger);
        registry.register("plaintext", plaintext);
        registry
    }

    pub fn register<F>(&mut self, name: &str, filter: F)
    where
        F: Fn(FeedEntry) -> Option<FeedEntry> + Send + Sync + 'static,
    {
        self.filters.insert(name.to_string(), Arc::new(filter));
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Looks up every name in order, failing on the first one that is not registered.
    pub fn resolve(&self, names: &[String]) -> Result<Pipeline, ConfigError> {
        let steps = names
            .iter()
            .map(|name| {
                self.filters
                    .get(name)
                    .map(|filter| (name.clone(), Arc::clone(filter)))
                    .ok_or_else(|| ConfigError::UnknownFilter {
                        name: name.clone(),
                        known: self.names().join(", "),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pipeline { steps })
    }
}

/// The ordered filters of one feed.
#[derive(Clone, Default)]
pub struct Pipeline {
    steps: Vec<(String, Filter)>,
}

impl Pipeline {
    /// Runs the filters in order, stopping at the first one that drops the entry.
    pub fn apply(&self, entry: FeedEntry) -> Option<FeedEntry> {
        self.steps
            .iter()
            .try_fold(entry, |entry, (_, filter)| filter(entry))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(name, _)| name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Appends a link to the item at the end of its content.
fn addurl(mut entry: FeedEntry) -> Option<FeedEntry> {
    if let Some(link) = &entry.link {
        entry.content = format!(
            "{}\n\n<p>URL: <a href=\"{link}\">{link}</a></p>",
            entry.content
        );
    }
    Some(entry)
}

static PARENTHESISED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^()]*\)").expect("valid regex"));

/// Removes "(...)" noise from Blogger author names.
fn blogger(mut entry: FeedEntry) -> Option<FeedEntry> {
    entry.author = entry
        .author
        .map(|author| PARENTHESISED.replace_all(&author, "").trim().to_string());
    Some(entry)
}

static ARXIV_AUTHOR_LIST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<p>Authors:\s*(.*?)\s*</p>").expect("valid regex"));
static ARXIV_AUTHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a href=".*?"\s*>(.*?)</a>"#).expect("valid regex"));
static ARXIV_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\s*\(.*\)\s*$").expect("valid regex"));

/// Turns an arXiv listing entry into a header with authors, subject and PDF link.
fn arxiv(mut entry: FeedEntry) -> Option<FeedEntry> {
    let authors: Vec<String> = ARXIV_AUTHOR_LIST
        .captures(&entry.content)
        .filter(|caps| caps.get(0).is_some_and(|m| m.start() == 0))
        .map(|caps| {
            ARXIV_AUTHOR
                .captures_iter(&caps[1])
                .map(|author| author[1].trim().to_string())
                .collect()
        })
        .unwrap_or_default();

    if let Some(title) = &entry.title
        && let Some(caps) = ARXIV_TITLE.captures(title)
    {
        entry.title = Some(caps[1].trim().to_string());
    }
    let subject = entry.title.as_deref().unwrap_or_default().trim().to_string();
    let pdf_link = entry
        .link
        .as_deref()
        .unwrap_or_default()
        .replace("arxiv.org/abs", "arxiv.org/pdf");

    let body = ARXIV_AUTHOR_LIST.replace_all(&entry.content, "");
    entry.content = format!(
        "<ul class=\"arxiv_head\">\n  \
         <li class=\"authors\"><b>Authors:</b> {}</li>\n  \
         <li class=\"subject\"><b>Subject:</b> {subject}</li>\n  \
         <li class=\"pdf\"><b>PDF:</b> <a href=\"{pdf_link}\">{pdf_link}</a></li>\n\
         </ul>\n{body}",
        authors.join(", "),
    );

    if let Some(id) = &entry.raw_id {
        entry.message_id = Some(format!("<{}@arXiv>", id.trim()));
    }
    Some(entry)
}

/// Replaces HTML content with its plain text rendering.
fn plaintext(mut entry: FeedEntry) -> Option<FeedEntry> {
    entry.content = html::to_text(&entry.content);
    Some(entry)
}
