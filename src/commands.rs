//! Command implementations behind the `nstore` binary.
//!
//! Every command that touches the store opens it the same way: a
//! [`NativeFs`] rooted at `store.data_dir`, the `sources` and `blocks`
//! collections registered and loaded. Commands that mutate end with a
//! forced flush so nothing is left to a debounce timer at exit.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use notestore_core::chunk::ChunkOptions;
use notestore_core::filter::FilterOpts;

use crate::adapters::{AdapterRegistry, BlockAdapter};
use crate::collection::Collection;
use crate::config::Config;
use crate::ingest;
use crate::log::SaveOutcome;
use crate::native_fs::NativeFs;
use crate::store::StoreHandle;

pub async fn open_store(config: &Config) -> Result<StoreHandle> {
    let data_dir = &config.store.data_dir;
    if !data_dir.is_dir() {
        bail!(
            "Store directory does not exist: {} (run `nstore init` first)",
            data_dir.display()
        );
    }
    let handle = StoreHandle::open(
        Arc::new(NativeFs::new(data_dir.clone())),
        config.store_settings(),
    );
    ingest::register_collections(&handle);
    let stats = handle.load_all().await?;
    if stats.skipped_files > 0 || stats.bad_records > 0 {
        tracing::warn!(
            skipped_files = stats.skipped_files,
            bad_records = stats.bad_records,
            "store loaded with errors"
        );
    }
    Ok(handle)
}

fn collection(handle: &StoreHandle, name: &str) -> Result<Arc<Collection>> {
    handle.collection(name).with_context(|| {
        format!(
            "Unknown collection '{}'. Available: {}, {}",
            name,
            ingest::SOURCES,
            ingest::BLOCKS
        )
    })
}

pub fn run_init(config: &Config) -> Result<()> {
    let data_dir = &config.store.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create store directory: {}", data_dir.display()))?;
    println!("Store initialized at {}", data_dir.display());
    Ok(())
}

pub fn run_chunks(file: &Path, chunking: &ChunkOptions) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_path = file.to_string_lossy().replace('\\', "/");
    let adapter = AdapterRegistry::default()
        .resolve(&file_path)
        .unwrap_or(BlockAdapter::Markdown);
    let parsed = adapter.parse(&text, &file_path, chunking)?;
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

pub async fn run_sync(config: &Config) -> Result<()> {
    let Some(fs_config) = config.connectors.filesystem.as_ref() else {
        bail!("Filesystem connector not configured ([connectors.filesystem])");
    };
    let handle = open_store(config).await?;
    let stats = ingest::sync_vault(&handle, fs_config, &config.chunking).await?;
    handle.flush_all().await?;

    println!("sync filesystem");
    println!("  sources: {}", stats.sources);
    println!("  blocks written: {}", stats.blocks_written);
    println!("  blocks removed: {}", stats.blocks_removed);
    println!("  sources removed: {}", stats.sources_removed);
    println!("  skipped files: {}", stats.skipped);
    println!("ok");
    Ok(())
}

pub async fn run_list(config: &Config, collection_name: &str, filter: &FilterOpts) -> Result<()> {
    let handle = open_store(config).await?;
    for key in collection(&handle, collection_name)?.list(filter) {
        println!("{}", key);
    }
    Ok(())
}

pub async fn run_get(config: &Config, collection_name: &str, key: &str) -> Result<()> {
    let handle = open_store(config).await?;
    let Some(item) = collection(&handle, collection_name)?.get(key) else {
        bail!("No item '{}' in collection '{}'", key, collection_name);
    };
    println!("{}", serde_json::to_string_pretty(&item.data)?);
    Ok(())
}

pub async fn run_delete(config: &Config, collection_name: &str, key: &str) -> Result<()> {
    let handle = open_store(config).await?;
    if !collection(&handle, collection_name)?.delete(key) {
        bail!("No item '{}' in collection '{}'", key, collection_name);
    }
    handle.flush_all().await?;
    println!("deleted {}", key);
    Ok(())
}

pub async fn run_compact(config: &Config) -> Result<()> {
    let handle = open_store(config).await?;
    for (name, outcome) in handle.flush_all().await? {
        match outcome {
            SaveOutcome::Rejected { new_size, old_size } => println!(
                "{}: rejected ({} bytes < {:.0}% of {} bytes)",
                name,
                new_size,
                config.save.min_size_ratio * 100.0,
                old_size
            ),
            SaveOutcome::Written { records } => println!("{}: {} records written", name, records),
            SaveOutcome::Clean | SaveOutcome::Skipped => println!("{}: compacted", name),
        }
    }
    Ok(())
}
