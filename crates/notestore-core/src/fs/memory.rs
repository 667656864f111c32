//! In-memory [`FileSystem`] for tests and embedding.
//!
//! Files and folders live in `BTreeMap`/`BTreeSet` behind
//! `std::sync::RwLock`. Folders are created implicitly by writes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{parent, FileStat, FileSystem, Listing};

#[derive(Debug, Default)]
pub struct MemoryFs {
    files: RwLock<BTreeMap<String, String>>,
    folders: RwLock<BTreeSet<String>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// All file paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Synchronous read for assertions.
    pub fn contents(&self, path: &str) -> Option<String> {
        self.files.read().ok()?.get(normalize(path)).cloned()
    }

    fn add_folders(&self, path: &str) -> Result<()> {
        let mut folders = self.folders.write().map_err(|_| anyhow!("folder lock poisoned"))?;
        let mut current = normalize(path);
        while !current.is_empty() {
            folders.insert(current.to_string());
            current = parent(current);
        }
        Ok(())
    }

    fn files_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, String>>> {
        self.files.write().map_err(|_| anyhow!("file lock poisoned"))
    }

    fn files_ref(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, String>>> {
        self.files.read().map_err(|_| anyhow!("file lock poisoned"))
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

#[async_trait]
impl FileSystem for MemoryFs {
    async fn read(&self, path: &str) -> Result<String> {
        self.files_ref()?
            .get(normalize(path))
            .cloned()
            .ok_or_else(|| anyhow!("no such file: {}", path))
    }

    async fn write(&self, path: &str, contents: &str) -> Result<()> {
        self.add_folders(parent(normalize(path)))?;
        self.files_mut()?
            .insert(normalize(path).to_string(), contents.to_string());
        Ok(())
    }

    async fn append(&self, path: &str, contents: &str) -> Result<()> {
        self.add_folders(parent(normalize(path)))?;
        self.files_mut()?
            .entry(normalize(path).to_string())
            .or_default()
            .push_str(contents);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize(path);
        if self.files_ref()?.contains_key(path) {
            return Ok(true);
        }
        let folders = self.folders.read().map_err(|_| anyhow!("folder lock poisoned"))?;
        Ok(path.is_empty() || folders.contains(path))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let files = self.files_ref()?;
        let contents = files
            .get(normalize(path))
            .ok_or_else(|| anyhow!("no such file: {}", path))?;
        Ok(FileStat {
            size: contents.len() as u64,
        })
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        self.add_folders(path)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut files = self.files_mut()?;
        let Some(contents) = files.remove(normalize(from)) else {
            bail!("no such file: {}", from);
        };
        files.insert(normalize(to).to_string(), contents);
        drop(files);
        self.add_folders(parent(normalize(to)))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        if self.files_mut()?.remove(normalize(path)).is_none() {
            bail!("no such file: {}", path);
        }
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Listing> {
        let dir = normalize(path);
        let files = self
            .files_ref()?
            .keys()
            .filter(|p| parent(p) == dir)
            .cloned()
            .collect();
        let folders = self
            .folders
            .read()
            .map_err(|_| anyhow!("folder lock poisoned"))?
            .iter()
            .filter(|p| parent(p) == dir && !p.is_empty())
            .cloned()
            .collect();
        Ok(Listing { files, folders })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_append_read() {
        let fs = MemoryFs::new();
        fs.write("data/a.ajson", "one,\n").await.unwrap();
        fs.append("data/a.ajson", "two,\n").await.unwrap();
        assert_eq!(fs.read("data/a.ajson").await.unwrap(), "one,\ntwo,\n");
        assert_eq!(fs.stat("data/a.ajson").await.unwrap().size, 10);
        assert!(fs.exists("data").await.unwrap());
    }

    #[tokio::test]
    async fn test_append_creates_file() {
        let fs = MemoryFs::new();
        fs.append("x/y.ajson", "r,\n").await.unwrap();
        assert_eq!(fs.contents("x/y.ajson").as_deref(), Some("r,\n"));
    }

    #[tokio::test]
    async fn test_rename_replaces_target() {
        let fs = MemoryFs::new();
        fs.write("a", "old").await.unwrap();
        fs.write("a.temp", "new").await.unwrap();
        fs.rename("a.temp", "a").await.unwrap();
        assert_eq!(fs.read("a").await.unwrap(), "new");
        assert!(!fs.exists("a.temp").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_direct_children_only() {
        let fs = MemoryFs::new();
        fs.write("d/one.ajson", "").await.unwrap();
        fs.write("d/two.ajson", "").await.unwrap();
        fs.write("d/sub/three.ajson", "").await.unwrap();
        let listing = fs.list("d").await.unwrap();
        assert_eq!(listing.files, vec!["d/one.ajson", "d/two.ajson"]);
        assert_eq!(listing.folders, vec!["d/sub"]);
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        let fs = MemoryFs::new();
        assert!(fs.read("nope").await.is_err());
        assert!(fs.stat("nope").await.is_err());
        assert!(fs.remove("nope").await.is_err());
        assert!(!fs.exists("nope").await.unwrap());
    }
}
