use std::fmt::Write;
use std::fs;
use std::path::Path;

use anyhow::{bail, ensure};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::entry::FeedEntry;
use crate::feed_source::FeedSource;
use crate::html;

const ADDRESS: &str = "feedmail@localhost";
const LINE_WIDTH: usize = 76;
/// Source bytes per encoded word, keeping each word within 75 characters.
const WORD_BYTES: usize = 45;

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Renders `entry` as a MIME message with a single base64-encoded body part.
/// `references` is the Message-ID of the copy this message supersedes, if any.
///
/// Fails if a header value would contain a line break or if a filter supplied
/// a Message-ID that is not of the form `<local@domain>`.
pub fn render(
    entry: &FeedEntry,
    source: &FeedSource,
    host: &str,
    rundate: DateTime<Utc>,
    references: Option<&str>,
) -> anyhow::Result<String> {
    let from = entry.author.as_deref().unwrap_or(&source.name);
    let subject = entry
        .title
        .as_deref()
        .map(subject_text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| source.name.clone());
    let message_id = match &entry.message_id {
        Some(id) => {
            ensure!(
                id.starts_with('<') && id.ends_with('>') && id.contains('@'),
                "invalid Message-ID {:?}",
                id
            );
            id.clone()
        }
        None => format!(
            "<{}.{}@{}>",
            rundate.format("%Y%m%d%H%M"),
            random_token(6),
            host
        ),
    };

    let mut headers = vec![
        ("From", format!("{} <{}>", encode_header(from), ADDRESS)),
        ("To", ADDRESS.to_string()),
        ("Subject", encode_header(&subject)),
        ("Date", entry.created_at.to_rfc2822()),
        ("Message-ID", message_id),
    ];
    if let Some(previous) = references {
        headers.push(("References", previous.to_string()));
    }
    if let Some(link) = &entry.link {
        headers.push(("X-URL", link.clone()));
    }
    if !entry.categories.is_empty() {
        headers.push(("X-Keywords", encode_header(&entry.categories.iter().join(", "))));
    }
    headers.push(("X-Feedmail-Rundate", rundate.to_rfc2822()));

    if let Some((name, _)) = headers
        .iter()
        .find(|(_, value)| value.contains(['\r', '\n']))
    {
        bail!("header {} contains a line break", name);
    }

    let (subtype, body) = if source.html {
        ("html", html_body(entry))
    } else {
        ("plain", text_body(entry))
    };
    let boundary = format!("feedmail-{}", random_token(16));

    let mut out = String::new();
    for (name, value) in &headers {
        writeln!(out, "{name}: {value}")?;
    }
    writeln!(out, "MIME-Version: 1.0")?;
    writeln!(out, "Content-Type: multipart/alternative; boundary=\"{boundary}\"")?;
    writeln!(out)?;
    writeln!(out, "--{boundary}")?;
    writeln!(out, "Content-Type: text/{subtype}; charset=\"utf-8\"")?;
    writeln!(out, "Content-Transfer-Encoding: base64")?;
    writeln!(out)?;
    for line in STANDARD.encode(body.as_bytes()).as_bytes().chunks(LINE_WIDTH) {
        writeln!(out, "{}", String::from_utf8_lossy(line))?;
    }
    writeln!(out, "--{boundary}--")?;
    Ok(out)
}

/// Titles are text that may carry markup, so literal angle brackets must survive.
fn subject_text(title: &str) -> String {
    html::to_text(&title.replace('<', "&lt;").replace('>', "&gt;"))
}

/// The Message-ID header of a delivered message file.
pub fn message_id_of(path: &Path) -> Option<String> {
    let text = fs::read_to_string(path).ok()?;
    text.lines()
        .take_while(|line| !line.is_empty())
        .find_map(|line| line.strip_prefix("Message-ID: "))
        .map(|id| id.trim().to_string())
}

fn html_body(entry: &FeedEntry) -> String {
    match &entry.link {
        Some(link) => {
            let link = html::escape(link);
            format!(
                "{}\n<p>Item URL: <a href=\"{link}\">{link}</a></p>",
                entry.content
            )
        }
        None => entry.content.clone(),
    }
}

fn text_body(entry: &FeedEntry) -> String {
    let text = html::to_text(&entry.content);
    match &entry.link {
        Some(link) => format!("{text}\n\nItem URL: {link}"),
        None => text,
    }
}

/// Leaves ASCII values alone and turns anything else into RFC 2047 encoded words.
fn encode_header(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }
    let mut words = Vec::new();
    let mut start = 0;
    while start < value.len() {
        let mut end = (start + WORD_BYTES).min(value.len());
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        words.push(format!("=?utf-8?b?{}?=", STANDARD.encode(&value[start..end])));
        start = end;
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RawEntry;
    use crate::feed_source::SourceKind;
    use chrono::TimeZone;

    fn source(html: bool) -> FeedSource {
        FeedSource {
            url: "https://example.com/feed.xml".to_string(),
            name: "Example Feed".to_string(),
            partition: "example".to_string(),
            kind: SourceKind::Rss,
            keywords: Default::default(),
            filters: Default::default(),
            html,
            max_items: None,
        }
    }

    fn entry() -> FeedEntry {
        FeedEntry::from_raw(
            RawEntry {
                author: Some("Jane Doe".to_string()),
                title: Some("Hello <b>world</b>".to_string()),
                link: Some("https://example.com/hello".to_string()),
                content: Some("<p>Body</p>".to_string()),
                id: Some("post-1".to_string()),
                categories: vec!["rust".to_string(), "news".to_string()],
                published: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()),
                ..RawEntry::default()
            },
            None,
        )
    }

    fn rundate() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap()
    }

    fn header<'a>(message: &'a str, name: &str) -> Option<&'a str> {
        let prefix = format!("{name}: ");
        message
            .lines()
            .take_while(|l| !l.is_empty())
            .find_map(|l| l.strip_prefix(prefix.as_str()))
    }

    fn decoded_body(message: &str) -> String {
        let encoded: String = message
            .split("Content-Transfer-Encoding: base64\n\n")
            .nth(1)
            .unwrap()
            .lines()
            .take_while(|l| !l.starts_with("--"))
            .collect();
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    }

    #[test]
    fn test_render_headers() {
        let message = render(&entry(), &source(true), "box", rundate(), None).unwrap();

        assert_eq!(header(&message, "From"), Some("Jane Doe <feedmail@localhost>"));
        assert_eq!(header(&message, "To"), Some("feedmail@localhost"));
        assert_eq!(header(&message, "Subject"), Some("Hello <b>world</b>"));
        assert_eq!(header(&message, "Date"), Some("Fri, 1 Mar 2024 12:30:00 +0000"));
        assert_eq!(header(&message, "X-URL"), Some("https://example.com/hello"));
        assert_eq!(header(&message, "X-Keywords"), Some("news, rust"));
        assert_eq!(header(&message, "MIME-Version"), Some("1.0"));
        let id = header(&message, "Message-ID").unwrap();
        assert!(id.starts_with("<202403020800."));
        assert!(id.ends_with("@box>"));
        assert_eq!(header(&message, "References"), None);
    }

    #[test]
    fn test_subject_keeps_angle_brackets() {
        let mut e = entry();
        e.title = Some("Why Vec<T> beats Box<[T]>".to_string());
        let message = render(&e, &source(true), "box", rundate(), None).unwrap();
        assert_eq!(header(&message, "Subject"), Some("Why Vec<T> beats Box<[T]>"));

        e.title = Some("Fish &amp; chips".to_string());
        let message = render(&e, &source(true), "box", rundate(), None).unwrap();
        assert_eq!(header(&message, "Subject"), Some("Fish & chips"));
    }

    #[test]
    fn test_references_previous_copy() {
        let dir = tempfile::TempDir::new().unwrap();
        let first = render(&entry(), &source(true), "box", rundate(), None).unwrap();
        let path = dir.path().join("first");
        fs::write(&path, &first).unwrap();

        let previous = message_id_of(&path).unwrap();
        assert_eq!(Some(previous.as_str()), header(&first, "Message-ID"));

        let second = render(&entry(), &source(true), "box", rundate(), Some(&previous)).unwrap();
        assert_eq!(header(&second, "References"), Some(previous.as_str()));
        assert_ne!(header(&second, "Message-ID"), Some(previous.as_str()));
        assert_eq!(message_id_of(&dir.path().join("missing")), None);
    }

    #[test]
    fn test_render_html_body() {
        let message = render(&entry(), &source(true), "box", rundate(), None).unwrap();
        assert!(message.contains("Content-Type: text/html; charset=\"utf-8\""));
        assert_eq!(
            decoded_body(&message),
            "<p>Body</p>\n<p>Item URL: <a href=\"https://example.com/hello\">https://example.com/hello</a></p>"
        );
    }

    #[test]
    fn test_render_plain_body() {
        let message = render(&entry(), &source(false), "box", rundate(), None).unwrap();
        assert!(message.contains("Content-Type: text/plain; charset=\"utf-8\""));
        assert_eq!(
            decoded_body(&message),
            "Body\n\nItem URL: https://example.com/hello"
        );
    }

    #[test]
    fn test_missing_author_and_title_use_feed_name() {
        let mut e = entry();
        e.author = None;
        e.title = None;
        let message = render(&e, &source(true), "box", rundate(), None).unwrap();
        assert_eq!(header(&message, "From"), Some("Example Feed <feedmail@localhost>"));
        assert_eq!(header(&message, "Subject"), Some("Example Feed"));
    }

    #[test]
    fn test_non_ascii_subject_is_encoded() {
        let mut e = entry();
        e.title = Some("Grüße".to_string());
        let message = render(&e, &source(true), "box", rundate(), None).unwrap();
        assert_eq!(
            header(&message, "Subject"),
            Some(format!("=?utf-8?b?{}?=", STANDARD.encode("Grüße")).as_str())
        );
    }

    #[test]
    fn test_long_values_split_into_words() {
        let value = "ä".repeat(40);
        let encoded = encode_header(&value);
        let words: Vec<&str> = encoded.split(' ').collect();
        assert_eq!(words.len(), 2);
        assert!(words.iter().all(|w| w.len() <= 75));
    }

    #[test]
    fn test_line_break_in_header_fails() {
        let mut e = entry();
        e.author = Some("Jane\nBcc: someone@example.com".to_string());
        assert!(render(&e, &source(true), "box", rundate(), None).is_err());
    }

    #[test]
    fn test_supplied_message_id() {
        let mut e = entry();
        e.message_id = Some("<2401.00001@arXiv>".to_string());
        let message = render(&e, &source(true), "box", rundate(), None).unwrap();
        assert_eq!(header(&message, "Message-ID"), Some("<2401.00001@arXiv>"));

        e.message_id = Some("2401.00001".to_string());
        assert!(render(&e, &source(true), "box", rundate(), None).is_err());
    }
}
