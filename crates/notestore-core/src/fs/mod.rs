//! Filesystem capability.
//!
//! The [`FileSystem`] trait is the only boundary the engine needs from its
//! host. A native directory, a note vault, or the in-memory [`MemoryFs`]
//! are interchangeable behind it.
//!
//! Paths are `/`-separated strings relative to the filesystem's root.
//! Implementations must be `Send + Sync` so log flushes can run on worker
//! tasks.
//!
//! [`MemoryFs`]: memory::MemoryFs

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Size in bytes.
    pub size: u64,
}

/// Result of [`FileSystem::list`]. Entries are full paths, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<String>,
    pub folders: Vec<String>,
}

#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;

    /// Create or truncate `path` with `contents`.
    async fn write(&self, path: &str, contents: &str) -> Result<()>;

    /// Append `contents` to `path`, creating it if missing.
    async fn append(&self, path: &str, contents: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Create `path` and any missing parents. Existing folders are fine.
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Move `from` to `to`, replacing `to` if it exists.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    async fn remove(&self, path: &str) -> Result<()>;

    /// Direct children of the folder at `path`.
    async fn list(&self, path: &str) -> Result<Listing>;
}

/// Join two relative path segments with `/`.
pub fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Everything before the last `/`, or `""`.
pub fn parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(p, _)| p)
}

/// Everything after the last `/`.
pub fn file_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, n)| n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(join("", "a.ajson"), "a.ajson");
        assert_eq!(join("data/", "a.ajson"), "data/a.ajson");
        assert_eq!(parent("data/blocks/a.ajson"), "data/blocks");
        assert_eq!(parent("a.ajson"), "");
        assert_eq!(file_name("data/blocks/a.ajson"), "a.ajson");
    }
}
