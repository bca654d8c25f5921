//! A maildir-backed delivery store that is its own dedup database.
//!
//! Every delivered file is named after the fingerprints of the item it holds, so
//! the in-memory [`StateIndex`] can always be rebuilt by listing the tree.

mod index;
mod maildir;
mod name;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub use index::{Partition, StateIndex, StoreRecord, lock};
pub use maildir::{CUR, Maildir, NEW, TMP, validate_partition};
pub use name::{MessageName, NameError, UNTRACKED, sanitize_host};

/// Anything that can be delivered and later recognised again.
pub trait Fingerprinted {
    /// Stable identity across fetches, or `None` when the item cannot be tracked.
    fn identity(&self) -> Option<&str>;
    /// Fingerprint of the item's body.
    fn content(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
