use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Last-seen text of each web source, one file per URL named by its digest.
#[derive(Debug, Clone)]
pub struct WebCache {
    dir: PathBuf,
}

/// A snapshot waiting to become the cached baseline for its URL.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheUpdate {
    pub url: String,
    pub content: String,
}

impl WebCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path(&self, url: &str) -> PathBuf {
        self.dir.join(mailstore::digest(url.as_bytes()))
    }

    /// The cached text for `url`, or an empty string if it was never seen.
    pub fn get(&self, url: &str) -> anyhow::Result<String> {
        let path = self.path(url);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn update(&self, url: &str, content: &str) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path(url);
        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.display()))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        drop(file);
        fs::rename(&tmp, &path).with_context(|| format!("failed to replace {}", path.display()))
    }
}

impl CacheUpdate {
    pub fn commit(&self, cache: &WebCache) -> anyhow::Result<()> {
        cache.update(&self.url, &self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_url_reads_empty() {
        let dir = TempDir::new().unwrap();
        let cache = WebCache::new(&dir.path().join("web"));
        assert_eq!(cache.get("https://example.com/").unwrap(), "");
    }

    #[test]
    fn test_update_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = WebCache::new(&dir.path().join("web"));
        cache.update("https://example.com/", "first").unwrap();
        cache.update("https://example.com/", "second").unwrap();
        assert_eq!(cache.get("https://example.com/").unwrap(), "second");
        assert_eq!(cache.get("https://example.com/other").unwrap(), "");
    }

    #[test]
    fn test_commit_writes_snapshot() {
        let dir = TempDir::new().unwrap();
        let cache = WebCache::new(dir.path());
        let update = CacheUpdate {
            url: "https://example.com/".to_string(),
            content: "snapshot".to_string(),
        };
        update.commit(&cache).unwrap();
        assert_eq!(cache.get("https://example.com/").unwrap(), "snapshot");
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
    }
}
