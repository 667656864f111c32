//! Vault ingestion.
//!
//! Walks a notes directory, parses each file with the adapter for its
//! extension, and reconciles two collections:
//!
//! | Collection | Kind | Key | Data |
//! |------------|------|-----|------|
//! | `sources` | `Source` | file path | `path`, `mtime`, `size`, `blocks` (block keys) |
//! | `blocks` | `Block` | block path | `path`, `heading`, `length`, `lines`, `hash`, `source` (an item ref) |
//!
//! Blocks a file no longer produces are deleted, as are sources (and their
//! blocks) whose files are gone. Unchanged files leave both collections
//! clean, so a repeated sync writes nothing.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use notestore_core::chunk::ChunkOptions;
use notestore_core::filter::FilterOpts;
use serde_json::json;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::adapters::AdapterRegistry;
use crate::config::FilesystemConnectorConfig;
use crate::item::{ItemKind, ItemRef};
use crate::store::StoreHandle;

pub const SOURCES: &str = "sources";
pub const BLOCKS: &str = "blocks";

/// A file read from the vault. `path` is relative to the vault root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultFile {
    pub path: String,
    pub body: String,
    /// Modification time, seconds since the Unix epoch.
    pub mtime: i64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub sources: usize,
    /// New or changed blocks.
    pub blocks_written: usize,
    pub blocks_removed: usize,
    pub sources_removed: usize,
    /// Files with no adapter for their extension.
    pub skipped: usize,
}

/// Register the `sources` and `blocks` collections on `handle`.
pub fn register_collections(handle: &StoreHandle) {
    handle.register(SOURCES, ItemKind::Source);
    handle.register(BLOCKS, ItemKind::Block);
}

pub fn scan_vault(fs_config: &FilesystemConnectorConfig) -> Result<Vec<VaultFile>> {
    let root = &fs_config.root;
    if !root.exists() {
        bail!("Vault root does not exist: {}", root.display());
    }

    let include_set = build_globset(&fs_config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/.obsidian/**".to_string(),
        "**/.trash/**".to_string(),
    ];
    default_excludes.extend(fs_config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(fs_config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match read_vault_file(path, rel_str) {
            Ok(file) => files.push(file),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn read_vault_file(path: &Path, relative_path: String) -> Result<VaultFile> {
    let metadata = std::fs::metadata(path)?;
    let mtime = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    Ok(VaultFile {
        path: relative_path,
        body,
        mtime,
        size: metadata.len(),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Scan the vault and reconcile it into `handle`'s collections.
pub async fn sync_vault(
    handle: &StoreHandle,
    fs_config: &FilesystemConnectorConfig,
    chunking: &ChunkOptions,
) -> Result<SyncStats> {
    let fs_config = fs_config.clone();
    let files = tokio::task::spawn_blocking(move || scan_vault(&fs_config))
        .await
        .context("Vault scan task failed")??;
    ingest_files(handle, &files, chunking, &AdapterRegistry::default())
}

/// Reconcile `files` (the complete vault) into the `sources` and `blocks`
/// collections. Flushing is left to the caller.
pub fn ingest_files(
    handle: &StoreHandle,
    files: &[VaultFile],
    chunking: &ChunkOptions,
    adapters: &AdapterRegistry,
) -> Result<SyncStats> {
    let sources = handle
        .collection(SOURCES)
        .context("The sources collection is not registered")?;
    let blocks = handle
        .collection(BLOCKS)
        .context("The blocks collection is not registered")?;

    let mut stats = SyncStats::default();
    let mut seen = BTreeSet::new();

    for file in files {
        let Some(adapter) = adapters.resolve(&file.path) else {
            tracing::debug!(path = %file.path, "no adapter for file; skipping");
            stats.skipped += 1;
            continue;
        };
        let parsed = adapter
            .parse(&file.body, &file.path, chunking)
            .with_context(|| format!("Failed to parse {}", file.path))?;
        seen.insert(file.path.clone());

        let source_ref = ItemRef::new(sources.name(), &file.path);
        for chunk in &parsed.blocks {
            let before = blocks.get(&chunk.path).map(|b| b.data);
            let data = json!({
                "path": chunk.path,
                "heading": chunk.heading,
                "length": chunk.length,
                "lines": chunk.lines,
                "hash": sha256_hex(&chunk.text),
                "source": source_ref.to_value(),
            });
            match blocks.create_or_update(data) {
                Some(item) if before.as_ref() != Some(&item.data) => stats.blocks_written += 1,
                _ => {}
            }
        }

        let keys = parsed.keys();
        stats.blocks_removed += remove_blocks(&blocks, &file.path, &keys);

        sources.create_or_update(json!({
            "path": file.path,
            "mtime": file.mtime,
            "size": file.size,
            "blocks": keys,
        }));
        stats.sources += 1;
    }

    for key in sources.keys() {
        if seen.contains(&key) {
            continue;
        }
        stats.blocks_removed += remove_blocks(&blocks, &key, &[]);
        if sources.delete(&key) {
            stats.sources_removed += 1;
        }
    }

    tracing::debug!(
        sources = stats.sources,
        blocks_written = stats.blocks_written,
        blocks_removed = stats.blocks_removed,
        sources_removed = stats.sources_removed,
        "vault reconciled"
    );
    Ok(stats)
}

/// Delete blocks of `source_path` not listed in `keep`.
fn remove_blocks(
    blocks: &crate::collection::Collection,
    source_path: &str,
    keep: &[String],
) -> usize {
    let stale = blocks.list(&FilterOpts {
        key_starts_with: Some(format!("{}#", source_path)),
        exclude_keys: keep.to_vec(),
        ..FilterOpts::default()
    });
    stale.iter().filter(|key| blocks.delete(key)).count()
}
