use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Written in place of the identity field for items that cannot be tracked.
pub const UNTRACKED: &str = "-";

#[derive(Debug, Error, PartialEq)]
pub enum NameError {
    #[error("expected five dot-separated fields in {0:?}")]
    FieldCount(String),
    #[error("invalid timestamp {timestamp:?} in {name:?}")]
    Timestamp { name: String, timestamp: String },
    #[error("empty fingerprint in {0:?}")]
    EmptyFingerprint(String),
}

/// The self-describing name of a delivered message file.
///
/// `{pid}.{host}.{identity}.{content}.{unix_seconds}`, optionally followed by a
/// `:2,FLAGS` suffix added by mail readers once the file moves to `cur/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageName {
    pub pid: String,
    pub host: String,
    pub identity: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl MessageName {
    pub fn parse(name: &str) -> Result<Self, NameError> {
        let stem = name.split_once(':').map_or(name, |(stem, _flags)| stem);

        let mut fields = stem.rsplitn(4, '.');
        let (Some(timestamp), Some(content), Some(identity), Some(origin)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(NameError::FieldCount(name.to_string()));
        };
        let Some((pid, host)) = origin.split_once('.') else {
            return Err(NameError::FieldCount(name.to_string()));
        };

        let created_at = timestamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| NameError::Timestamp {
                name: name.to_string(),
                timestamp: timestamp.to_string(),
            })?;

        if content.is_empty() || identity.is_empty() {
            return Err(NameError::EmptyFingerprint(name.to_string()));
        }

        Ok(Self {
            pid: pid.to_string(),
            host: host.to_string(),
            identity: (identity != UNTRACKED).then(|| identity.to_string()),
            content: content.to_string(),
            created_at,
        })
    }
}

impl fmt::Display for MessageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.pid,
            self.host,
            self.identity.as_deref().unwrap_or(UNTRACKED),
            self.content,
            self.created_at.timestamp()
        )
    }
}

/// Makes a hostname safe to embed as a single name field.
pub fn sanitize_host(host: &str) -> String {
    let cleaned: String = host
        .chars()
        .map(|c| match c {
            '/' | ':' | '.' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    if cleaned.is_empty() {
        "localhost".to_string()
    } else {
        cleaned
    }
}
