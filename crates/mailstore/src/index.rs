use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use anyhow::Context;
use chrono::{DateTime, Utc};

use crate::Fingerprinted;
use crate::maildir::DELIVERED_STATES;
use crate::name::MessageName;

/// One delivered message, as recovered from its file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRecord {
    pub partition: String,
    pub identity: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

/// The best known record for every identity delivered into one partition.
#[derive(Debug, Default)]
pub struct Partition {
    name: String,
    records: HashMap<String, StoreRecord>,
}

impl Partition {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            records: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&StoreRecord> {
        self.records.get(identity)
    }

    pub fn is_seen(&self, identity: &str) -> bool {
        self.records.contains_key(identity)
    }

    /// Whether `item` should be delivered.
    ///
    /// Untracked items are always novel. A tracked item is novel when nothing was
    /// delivered for its identity yet, or when it is strictly newer than the stored
    /// record *and* its content changed.
    pub fn is_novel<T: Fingerprinted + ?Sized>(&self, item: &T) -> bool {
        let Some(identity) = item.identity() else {
            return true;
        };
        match self.records.get(identity) {
            None => true,
            Some(record) => {
                record.created_at < item.created_at() && record.content != item.content()
            }
        }
    }

    /// Stores `record` as the current one for its identity, replacing whatever was there.
    pub fn record_delivery(&mut self, record: StoreRecord) {
        self.records.insert(record.identity.clone(), record);
    }

    /// Keeps `record` only if it is newer than the one already held. Used while
    /// rescanning, where older duplicates are superseded but left on disk.
    fn supersede(&mut self, record: StoreRecord) {
        match self.records.get(&record.identity) {
            Some(existing) if existing.created_at >= record.created_at => {
                log::debug!(
                    "{} superseded by {}",
                    record.path.display(),
                    existing.path.display()
                );
            }
            _ => {
                self.records.insert(record.identity.clone(), record);
            }
        }
    }
}

/// In-memory dedup state for the whole store: partition name to [`Partition`].
///
/// Each partition sits behind its own lock, so deliveries into different
/// partitions never wait on each other while deliveries into the same one are
/// serialized.
#[derive(Debug, Default)]
pub struct StateIndex {
    partitions: RwLock<HashMap<String, Arc<Mutex<Partition>>>>,
}

impl StateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstructs the index from every delivered file under `root`.
    ///
    /// Only first-level directories are partitions, and only their `cur/` and
    /// `new/` entries count. Names that do not parse are logged and skipped.
    pub fn rebuild(root: &Path) -> anyhow::Result<Self> {
        let index = Self::new();
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list {}", root.display()));
            }
        };

        for entry in entries {
            let entry = entry.with_context(|| format!("failed to list {}", root.display()))?;
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let Some(partition_name) = entry.file_name().to_str().map(str::to_string) else {
                log::warn!("skipping non UTF-8 directory {}", entry.path().display());
                continue;
            };

            let handle = index.partition(&partition_name);
            let mut partition = lock(&handle);
            for state in DELIVERED_STATES {
                scan_state_dir(&entry.path().join(state), &mut partition)?;
            }
            log::debug!(
                "indexed {} identities in {}",
                partition.len(),
                partition_name
            );
        }
        Ok(index)
    }

    /// The lock for `name`, created empty on first use.
    pub fn partition(&self, name: &str) -> Arc<Mutex<Partition>> {
        if let Some(existing) = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Arc::clone(existing);
        }
        let mut partitions = self
            .partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            partitions
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Partition::new(name)))),
        )
    }

    pub fn partition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .partitions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn is_seen(&self, partition: &str, identity: &str) -> bool {
        lock(&self.partition(partition)).is_seen(identity)
    }

    pub fn is_novel<T: Fingerprinted + ?Sized>(&self, partition: &str, item: &T) -> bool {
        lock(&self.partition(partition)).is_novel(item)
    }

    pub fn record_delivery(&self, record: StoreRecord) {
        let handle = self.partition(&record.partition);
        lock(&handle).record_delivery(record);
    }
}

/// Locks a partition, recovering it if another worker panicked while holding it.
pub fn lock(partition: &Mutex<Partition>) -> MutexGuard<'_, Partition> {
    partition.lock().unwrap_or_else(PoisonError::into_inner)
}

fn scan_state_dir(dir: &Path, partition: &mut Partition) -> anyhow::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
            log::warn!("skipping non UTF-8 file name {}", path.display());
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }
        let name = match MessageName::parse(file_name) {
            Ok(name) => name,
            Err(e) => {
                log::warn!("skipping {}: {}", path.display(), e);
                continue;
            }
        };
        let Some(identity) = name.identity else {
            continue;
        };
        partition.supersede(StoreRecord {
            partition: partition.name.clone(),
            identity,
            content: name.content,
            created_at: name.created_at,
            path,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    struct Item {
        identity: Option<&'static str>,
        content: &'static str,
        created_at: DateTime<Utc>,
    }

    impl Fingerprinted for Item {
        fn identity(&self) -> Option<&str> {
            self.identity
        }
        fn content(&self) -> &str {
            self.content
        }
        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn record(partition: &str, identity: &str, content: &str, secs: i64) -> StoreRecord {
        StoreRecord {
            partition: partition.to_string(),
            identity: identity.to_string(),
            content: content.to_string(),
            created_at: at(secs),
            path: PathBuf::from(format!("/nowhere/{identity}.{content}.{secs}")),
        }
    }

    fn touch(root: &Path, partition: &str, state: &str, name: &str) {
        let dir = root.join(partition).join(state);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), "message").unwrap();
    }

    #[test]
    fn test_unseen_identity_is_novel() {
        let index = StateIndex::new();
        let item = Item {
            identity: Some("id"),
            content: "c1",
            created_at: at(10),
        };
        assert!(index.is_novel("news", &item));
        assert!(!index.is_seen("news", "id"));
    }

    #[test]
    fn test_untracked_item_is_always_novel() {
        let index = StateIndex::new();
        index.record_delivery(record("news", "id", "c1", 10));
        let item = Item {
            identity: None,
            content: "c1",
            created_at: at(10),
        };
        assert!(index.is_novel("news", &item));
    }

    #[rstest]
    #[case::newer_and_changed(20, "c2", true)]
    #[case::newer_but_same_content(20, "c1", false)]
    #[case::same_time_changed(10, "c2", false)]
    #[case::older_and_changed(5, "c2", false)]
    #[case::older_same_content(5, "c1", false)]
    fn test_seen_item_novelty(#[case] secs: i64, #[case] content: &'static str, #[case] novel: bool) {
        let index = StateIndex::new();
        index.record_delivery(record("news", "id", "c1", 10));
        let item = Item {
            identity: Some("id"),
            content,
            created_at: at(secs),
        };
        assert_eq!(index.is_novel("news", &item), novel);
    }

    #[test]
    fn test_partitions_are_isolated() {
        let index = StateIndex::new();
        index.record_delivery(record("a", "id", "c1", 10));
        assert!(index.is_seen("a", "id"));
        assert!(!index.is_seen("b", "id"));
        let item = Item {
            identity: Some("id"),
            content: "c1",
            created_at: at(10),
        };
        assert!(index.is_novel("b", &item));
    }

    #[test]
    fn test_record_delivery_overwrites_unconditionally() {
        let index = StateIndex::new();
        index.record_delivery(record("news", "id", "new", 20));
        index.record_delivery(record("news", "id", "old", 10));
        let handle = index.partition("news");
        let partition = lock(&handle);
        assert_eq!(partition.get("id").unwrap().content, "old");
        assert_eq!(partition.len(), 1);
    }

    #[test]
    fn test_rebuild_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let index = StateIndex::rebuild(&dir.path().join("absent")).unwrap();
        assert!(index.partition_names().is_empty());
    }

    #[test]
    fn test_rebuild_reads_cur_and_new_but_not_tmp() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "news", "new", "1.host.aaa.c1.100");
        touch(dir.path(), "news", "cur", "1.host.bbb.c2.100:2,S");
        touch(dir.path(), "news", "tmp", "1.host.ccc.c3.100");

        let index = StateIndex::rebuild(dir.path()).unwrap();
        assert!(index.is_seen("news", "aaa"));
        assert!(index.is_seen("news", "bbb"));
        assert!(!index.is_seen("news", "ccc"));
    }

    #[test]
    fn test_rebuild_keeps_newest_duplicate() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "news", "cur", "1.host.aaa.old.100:2,S");
        touch(dir.path(), "news", "new", "2.host.aaa.newest.300");
        touch(dir.path(), "news", "new", "3.host.aaa.middle.200");

        let index = StateIndex::rebuild(dir.path()).unwrap();
        let handle = index.partition("news");
        let partition = lock(&handle);
        let best = partition.get("aaa").unwrap();
        assert_eq!(best.content, "newest");
        assert_eq!(best.created_at, at(300));
        assert!(dir.path().join("news/cur/1.host.aaa.old.100:2,S").exists());
    }

    #[test]
    fn test_rebuild_skips_unparseable_names() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "news", "new", "not-a-message");
        touch(dir.path(), "news", "new", "1.host.aaa.c1.notanumber");
        touch(dir.path(), "news", "new", "1.host.bbb.c1.100");

        let index = StateIndex::rebuild(dir.path()).unwrap();
        let handle = index.partition("news");
        let partition = lock(&handle);
        assert_eq!(partition.len(), 1);
        assert!(partition.is_seen("bbb"));
    }

    #[test]
    fn test_rebuild_ignores_untracked_files_and_stray_root_files() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "news", "new", "1.host.-.c1.100");
        fs::write(dir.path().join("README"), "not a partition").unwrap();

        let index = StateIndex::rebuild(dir.path()).unwrap();
        assert_eq!(index.partition_names(), vec!["news".to_string()]);
        assert!(lock(&index.partition("news")).is_empty());
    }
}
