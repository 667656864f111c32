//! [`FileSystem`] over a native directory, using `tokio::fs`.
//!
//! Paths are relative to `root` and may not contain `..` components.
//! Listings return root-relative `/`-separated paths, matching
//! [`MemoryFs`](notestore_core::fs::memory::MemoryFs).

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use notestore_core::fs::{join, FileStat, FileSystem, Listing};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct NativeFs {
    root: PathBuf,
}

impl NativeFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            bail!("path escapes the store root: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))
    }

    async fn write(&self, path: &str, contents: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::write(&full, contents)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))
    }

    async fn append(&self, path: &str, contents: &str) -> Result<()> {
        let full = self.resolve(path)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&full)
            .await
            .with_context(|| format!("Failed to open {} for append", full.display()))?;
        file.write_all(contents.as_bytes())
            .await
            .with_context(|| format!("Failed to append to {}", full.display()))?;
        file.flush().await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)?).await?)
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let full = self.resolve(path)?;
        let meta = tokio::fs::metadata(&full)
            .await
            .with_context(|| format!("Failed to stat {}", full.display()))?;
        Ok(FileStat { size: meta.len() })
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::create_dir_all(&full)
            .await
            .with_context(|| format!("Failed to create directory {}", full.display()))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (from_full, to_full) = (self.resolve(from)?, self.resolve(to)?);
        tokio::fs::rename(&from_full, &to_full).await.with_context(|| {
            format!(
                "Failed to rename {} to {}",
                from_full.display(),
                to_full.display()
            )
        })
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::remove_file(&full)
            .await
            .with_context(|| format!("Failed to remove {}", full.display()))
    }

    async fn list(&self, path: &str) -> Result<Listing> {
        let full = self.resolve(path)?;
        let mut entries = tokio::fs::read_dir(&full)
            .await
            .with_context(|| format!("Failed to list {}", full.display()))?;

        let mut listing = Listing::default();
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::warn!(dir = %full.display(), "skipping non-UTF-8 file name");
                continue;
            };
            let child = join(path.trim_matches('/'), &name);
            if entry.file_type().await?.is_dir() {
                listing.folders.push(child);
            } else {
                listing.files.push(child);
            }
        }
        listing.files.sort();
        listing.folders.sort();
        Ok(listing)
    }
}
