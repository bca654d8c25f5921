use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

use crate::Fingerprinted;
use crate::index::{Partition, StateIndex, StoreRecord};
use crate::name::{MessageName, sanitize_host};

pub const CUR: &str = "cur";
pub const NEW: &str = "new";
pub const TMP: &str = "tmp";

/// Subdirectories whose files count as delivered.
pub const DELIVERED_STATES: [&str; 2] = [CUR, NEW];

/// A root directory of maildirs, one per partition, plus the index rebuilt from it.
#[derive(Debug)]
pub struct Maildir {
    root: PathBuf,
    pid: String,
    host: String,
    index: StateIndex,
}

impl Maildir {
    /// Opens the store at `root`, creating it if needed.
    ///
    /// Files left in any partition's `tmp/` by an interrupted run are removed
    /// before the index is rebuilt from `cur/` and `new/`.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create store root {}", root.display()))?;
        purge_staging(root)?;
        let index = StateIndex::rebuild(root)?;
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default();
        Ok(Self::with_origin(root, index, std::process::id(), &host))
    }

    fn with_origin(root: &Path, index: StateIndex, pid: u32, host: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            pid: pid.to_string(),
            host: sanitize_host(host),
            index,
        }
    }

    pub fn index(&self) -> &StateIndex {
        &self.index
    }

    pub fn partition_dir(&self, partition: &str) -> PathBuf {
        self.root.join(partition)
    }

    /// Creates `cur/`, `new/` and `tmp/` for `partition`. Existing directories are fine.
    pub fn create(&self, partition: &str) -> anyhow::Result<()> {
        validate_partition(partition)?;
        let dir = self.partition_dir(partition);
        for state in [CUR, NEW, TMP] {
            let path = dir.join(state);
            fs::create_dir_all(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
        }
        Ok(())
    }

    /// The file name `item` is delivered under.
    pub fn message_name<T: Fingerprinted + ?Sized>(&self, item: &T) -> MessageName {
        MessageName {
            pid: self.pid.clone(),
            host: self.host.clone(),
            identity: item.identity().map(str::to_string),
            content: item.content().to_string(),
            created_at: item.created_at(),
        }
    }

    /// Writes `message` for `item` into `partition` and records it in the index.
    ///
    /// The caller holds the partition lock, so the novelty check it made stays
    /// valid until the record is in place. The message is staged in `tmp/`,
    /// synced, then renamed into `new/`; an existing file of the same name is
    /// replaced.
    pub fn deliver<T: Fingerprinted + ?Sized>(
        &self,
        partition: &mut Partition,
        item: &T,
        message: &[u8],
    ) -> anyhow::Result<PathBuf> {
        let name = self.message_name(item).to_string();
        let dir = self.partition_dir(partition.name());
        let staged = dir.join(TMP).join(&name);
        let target = dir.join(NEW).join(&name);

        write_synced(&staged, message)?;
        if let Err(e) = fs::rename(&staged, &target) {
            let _ = fs::remove_file(&staged);
            return Err(e).with_context(|| {
                format!("failed to move {} into {}", name, target.display())
            });
        }
        log::debug!("delivered {}", target.display());

        let Some(identity) = item.identity() else {
            return Ok(target);
        };

        if let Some(previous) = partition.get(identity)
            && previous.path != target
            && stem(&previous.path) == Some(name.as_str())
        {
            fs::remove_file(&previous.path).with_context(|| {
                format!("failed to remove replaced {}", previous.path.display())
            })?;
        }

        partition.record_delivery(StoreRecord {
            partition: partition.name().to_string(),
            identity: identity.to_string(),
            content: item.content().to_string(),
            created_at: item.created_at(),
            path: target.clone(),
        });
        Ok(target)
    }
}

/// Rejects partition names that would not be a single directory under the root.
pub fn validate_partition(partition: &str) -> anyhow::Result<()> {
    if partition.is_empty() || partition == "." || partition == ".." {
        bail!("invalid partition name {:?}", partition);
    }
    if partition.contains(['/', '\\']) {
        bail!("partition name {:?} must not contain a path separator", partition);
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("failed to write {}", path.display()))
}

/// File name without the `:2,FLAGS` suffix.
fn stem(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    Some(name.split_once(':').map_or(name, |(stem, _)| stem))
}

fn purge_staging(root: &Path) -> anyhow::Result<()> {
    let entries =
        fs::read_dir(root).with_context(|| format!("failed to list {}", root.display()))?;
    for entry in entries.flatten() {
        let tmp = entry.path().join(TMP);
        let Ok(staged) = fs::read_dir(&tmp) else {
            continue;
        };
        for file in staged.flatten() {
            let path = file.path();
            if !path.is_file() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => log::info!("removed leftover {}", path.display()),
                Err(e) => log::warn!("could not remove leftover {}: {}", path.display(), e),
            }
        }
    }
    Ok(())
}
