use html2text::from_read_with_decorator;
use html2text::render::text_renderer::TrivialDecorator;
use itertools::Itertools;
use scraper::{Html, Selector};

const WRAP_WIDTH: usize = 1000;

/// Renders an HTML fragment as plain text, without any markup decoration.
///
/// Whitespace inside a line is collapsed and runs of blank lines are squeezed
/// to one.
pub fn to_text(html: &str) -> String {
    let rendered = from_read_with_decorator(html.as_bytes(), WRAP_WIDTH, TrivialDecorator::new());
    squeeze_lines(&rendered)
}

/// The inner HTML of the document's `<body>`, or the whole input if it has none.
pub fn body(document: &str) -> String {
    let Ok(selector) = Selector::parse("body") else {
        return document.to_string();
    };
    Html::parse_document(document)
        .select(&selector)
        .next()
        .map(|body| body.inner_html())
        .unwrap_or_else(|| document.to_string())
}

fn squeeze_lines(raw: &str) -> String {
    let mut out = String::new();
    let mut pending_blank = false;
    for line in raw.lines() {
        let line = line.split_whitespace().join(" ");
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(&line);
    }
    out
}

/// The text of the document's `<title>`, if any.
pub fn title(document: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let document = Html::parse_document(document);
    let title = document
        .select(&selector)
        .next()?
        .text()
        .collect::<String>()
        .split_whitespace()
        .join(" ");
    (!title.is_empty()).then_some(title)
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}
