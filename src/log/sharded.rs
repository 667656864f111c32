use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use notestore_core::fs::{join, FileSystem};
use notestore_core::record::{encode_records, parse_log, LogEntries, LOG_EXTENSION};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;

use super::{LoadStats, LogAdapter, SaveOutcome};
use crate::collection::{Collection, PendingRecord};
use crate::config::SaveSettings;

/// Longest shard file stem before it is shortened with a hash suffix.
const MAX_SHARD_STEM: usize = 120;

/// One append-only `.ajson` file per shard under `<dir>/`.
///
/// Items whose keys share the part before the first `#` (a document and
/// its blocks) share a shard. Saves append to shards in parallel, bounded
/// by `max_parallel_shards`, with at most one writer per shard. Saves
/// themselves run one at a time, so records for a key are appended in the
/// order they were taken from the save queue. Every load
/// compacts: a shard holding superseded records, tombstones or malformed
/// records is rewritten with only its live records, or removed when none
/// are left. A shard with no readable records at all is left untouched.
pub struct ShardedLog {
    fs: Arc<dyn FileSystem>,
    dir: String,
    batch_size: usize,
    max_parallel_shards: usize,
    shard_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    write_lock: AsyncMutex<()>,
}

/// File stem for the shard holding `key`.
pub fn shard_file_key(key: &str) -> String {
    let group = key.split('#').next().unwrap_or(key);
    let stem: String = group
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if stem.is_empty() {
        return "_".to_string();
    }
    if stem.len() <= MAX_SHARD_STEM {
        return stem;
    }
    let digest = Sha256::digest(group.as_bytes());
    let hash: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", &stem[..MAX_SHARD_STEM - 17], hash)
}

impl ShardedLog {
    pub fn new(fs: Arc<dyn FileSystem>, dir: String, settings: &SaveSettings) -> Self {
        Self {
            fs,
            dir,
            batch_size: settings.batch_size.max(1),
            max_parallel_shards: settings.max_parallel_shards.max(1),
            shard_locks: Mutex::new(HashMap::new()),
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn shard_path(&self, key: &str) -> String {
        join(
            &self.dir,
            &format!("{}.{}", shard_file_key(key), LOG_EXTENSION),
        )
    }

    fn shard_lock(&self, path: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .shard_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.to_string()).or_default())
    }

    async fn load_shard(&self, collection: &Collection, path: &str) -> LoadStats {
        let lock = self.shard_lock(path);
        let _shard = lock.lock().await;

        let contents = match self.fs.read(path).await {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(path, error = %e, "skipping unreadable shard");
                return LoadStats {
                    skipped_files: 1,
                    ..LoadStats::default()
                };
            }
        };

        let entries = parse_log(&contents, self.batch_size);
        for error in &entries.errors {
            tracing::warn!(path, error = %error, "skipping malformed record");
        }
        if entries.records.is_empty() && !entries.errors.is_empty() {
            tracing::warn!(path, "no readable records; leaving shard as is");
            return LoadStats {
                skipped_files: 1,
                bad_records: entries.errors.len(),
                ..LoadStats::default()
            };
        }

        let records = collection.apply_loaded(
            entries
                .records
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_ref())),
        );
        let mut stats = LoadStats {
            files: 1,
            records,
            bad_records: entries.errors.len(),
            ..LoadStats::default()
        };

        if entries.is_compactable() {
            match self.compact(path, &entries).await {
                Ok(()) => stats.compacted_files = 1,
                Err(e) => tracing::warn!(path, error = %e, "shard compaction failed"),
            }
        }
        stats
    }

    async fn compact(&self, path: &str, entries: &LogEntries) -> Result<()> {
        let live = entries.encode_live();
        if live.is_empty() {
            return self.fs.remove(path).await;
        }
        let temp = format!("{}.temp", path);
        self.fs.write(&temp, &live).await?;
        self.fs.rename(&temp, path).await
    }
}

#[async_trait]
impl LogAdapter for ShardedLog {
    async fn load(&self, collection: &Collection) -> Result<LoadStats> {
        if !self.fs.exists(&self.dir).await? {
            self.fs
                .mkdir(&self.dir)
                .await
                .with_context(|| format!("Failed to create shard directory: {}", self.dir))?;
            return Ok(LoadStats::default());
        }

        let listing = self
            .fs
            .list(&self.dir)
            .await
            .with_context(|| format!("Failed to list shard directory: {}", self.dir))?;

        let suffix = format!(".{}", LOG_EXTENSION);
        let mut stats = LoadStats::default();
        for path in listing.files.iter().filter(|p| p.ends_with(&suffix)) {
            stats.absorb(self.load_shard(collection, path).await);
        }

        tracing::debug!(
            dir = %self.dir,
            files = stats.files,
            records = stats.records,
            compacted = stats.compacted_files,
            "loaded shards"
        );
        Ok(stats)
    }

    async fn save(&self, collection: &Collection, _force: bool) -> Result<SaveOutcome> {
        let _write = self.write_lock.lock().await;

        let pending = collection.take_save_queue();
        if pending.is_empty() {
            return Ok(SaveOutcome::Clean);
        }

        if let Err(e) = self.fs.mkdir(&self.dir).await {
            collection.requeue(pending);
            return Err(e.context(format!("Failed to create shard directory: {}", self.dir)));
        }

        let mut by_shard: BTreeMap<String, Vec<PendingRecord>> = BTreeMap::new();
        for record in pending {
            by_shard
                .entry(self.shard_path(&record.key))
                .or_default()
                .push(record);
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel_shards));
        let mut tasks = JoinSet::new();
        for (path, records) in &by_shard {
            let encoded = encode_records(
                records
                    .iter()
                    .map(|r| (r.record_key.as_str(), r.value.as_ref())),
            );
            let fs = Arc::clone(&self.fs);
            let lock = self.shard_lock(path);
            let semaphore = Arc::clone(&semaphore);
            let path = path.clone();
            tasks.spawn(async move {
                let result = async {
                    let _permit = semaphore.acquire().await?;
                    let _shard = lock.lock().await;
                    fs.append(&path, &encoded).await?;
                    anyhow::Ok(())
                }
                .await;
                (path, result)
            });
        }

        let mut written = 0;
        let mut first_error: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((path, Ok(()))) => {
                    if let Some(records) = by_shard.remove(&path) {
                        written += records.len();
                    }
                }
                Ok((path, Err(e))) => {
                    tracing::error!(path = %path, error = %e, "shard append failed");
                    first_error.get_or_insert(e.context(format!("Failed to append shard: {}", path)));
                }
                Err(e) => {
                    tracing::error!(error = %e, "shard append task failed");
                    first_error.get_or_insert(anyhow!(e));
                }
            }
        }

        if by_shard.is_empty() {
            return Ok(SaveOutcome::Written { records: written });
        }

        let failed_shards = by_shard.len();
        collection.requeue(by_shard.into_values().flatten().collect());
        let error = first_error.unwrap_or_else(|| anyhow!("shard append did not complete"));
        Err(error.context(format!("{} shard(s) failed to save", failed_shards)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;
    use crate::log::LogStrategy;
    use async_trait::async_trait;
    use notestore_core::fs::memory::MemoryFs;
    use notestore_core::fs::{FileStat, Listing};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Notify;

    fn open(fs: Arc<MemoryFs>) -> Arc<Collection> {
        let settings = SaveSettings {
            max_parallel_shards: 3,
            ..SaveSettings::default()
        };
        let adapter = LogStrategy::Sharded.build(fs, "blocks", &settings);
        Collection::new("blocks", ItemKind::Block, adapter, &settings)
    }

    #[test]
    fn test_shard_file_key() {
        assert_eq!(shard_file_key("notes/a.md#Intro#Sub"), "notes_a_md");
        assert_eq!(shard_file_key("notes/a.md"), "notes_a_md");
        assert_eq!(shard_file_key("2f1a9c33"), "2f1a9c33");
        assert_eq!(shard_file_key("#orphan"), "_");

        let long = format!("{}#H", "x".repeat(300));
        let stem = shard_file_key(&long);
        assert_eq!(stem.len(), MAX_SHARD_STEM);
        assert_eq!(stem, shard_file_key(&format!("{}#Other", "x".repeat(300))));
        assert_ne!(stem, shard_file_key(&"x".repeat(301)));
    }

    #[tokio::test]
    async fn test_round_trip_across_shards() {
        let fs = Arc::new(MemoryFs::new());
        let c = open(fs.clone());
        c.load().await.unwrap();
        for doc in 0..10 {
            for heading in ["Intro", "Body"] {
                c.create_or_update(json!({
                    "path": format!("doc{}.md#{}", doc, heading),
                    "lines": [doc, doc + 1],
                    "meta": {"heading": heading},
                }))
                .unwrap();
            }
        }
        assert_eq!(
            c.flush(false).await.unwrap(),
            SaveOutcome::Written { records: 20 }
        );
        assert_eq!(fs.paths().len(), 10);

        let reloaded = open(fs.clone());
        let stats = reloaded.load().await.unwrap();
        assert_eq!(stats.files, 10);
        assert_eq!(stats.records, 20);
        assert_eq!(stats.compacted_files, 0);
        assert_eq!(reloaded.keys(), c.keys());
        assert_eq!(
            reloaded.get("doc3.md#Body").unwrap().data,
            c.get("doc3.md#Body").unwrap().data
        );
    }

    #[tokio::test]
    async fn test_saves_append_and_load_compacts() {
        let fs = Arc::new(MemoryFs::new());
        let c = open(fs.clone());
        for v in 0..3 {
            c.create_or_update(json!({"path": "a.md#H", "v": v})).unwrap();
            c.flush(false).await.unwrap();
        }
        let raw = fs.contents("blocks/a_md.ajson").unwrap();
        assert_eq!(raw.matches("Block:a.md#H").count(), 3);

        let reloaded = open(fs.clone());
        let stats = reloaded.load().await.unwrap();
        assert_eq!(stats.compacted_files, 1);
        assert_eq!(reloaded.get("a.md#H").unwrap().data["v"], json!(2));
        let raw = fs.contents("blocks/a_md.ajson").unwrap();
        assert_eq!(raw.matches("Block:a.md#H").count(), 1);
    }

    #[tokio::test]
    async fn test_tombstone_then_compaction_removes_shard() {
        let fs = Arc::new(MemoryFs::new());
        let c = open(fs.clone());
        c.create_or_update(json!({"path": "gone.md#K", "v": 1})).unwrap();
        c.create_or_update(json!({"path": "kept.md#K", "v": 1})).unwrap();
        c.flush(false).await.unwrap();

        assert!(c.delete("gone.md#K"));
        c.flush(false).await.unwrap();
        let raw = fs.contents("blocks/gone_md.ajson").unwrap();
        assert!(raw.ends_with("\"Block:gone.md#K\":null,\n"));

        let reloaded = open(fs.clone());
        reloaded.load().await.unwrap();
        assert!(reloaded.get("gone.md#K").is_none());
        assert!(reloaded.get("kept.md#K").is_some());
        assert!(fs.contents("blocks/gone_md.ajson").is_none());
        assert!(fs.contents("blocks/kept_md.ajson").is_some());
    }

    #[tokio::test]
    async fn test_corrupt_shard_does_not_abort_load() {
        let fs = Arc::new(MemoryFs::new());
        fs.write("blocks/bad.ajson", "{{{ not json").await.unwrap();
        fs.write(
            "blocks/torn.ajson",
            "\"Block:torn.md#A\":{\"v\":1},\n\"Block:torn.md#B\":{\"v\":",
        )
        .await
        .unwrap();
        fs.write("blocks/good.ajson", "\"Block:good.md#A\":{\"v\":1},\n")
            .await
            .unwrap();
        fs.write("blocks/notes.txt", "ignored").await.unwrap();

        let c = open(fs.clone());
        let stats = c.load().await.unwrap();
        assert_eq!(stats.skipped_files, 1);
        assert_eq!(stats.bad_records, 2);
        assert_eq!(c.keys(), vec!["good.md#A", "torn.md#A"]);

        assert_eq!(fs.contents("blocks/bad.ajson").unwrap(), "{{{ not json");
        assert_eq!(
            fs.contents("blocks/torn.ajson").unwrap(),
            "\"Block:torn.md#A\":{\"v\":1},\n"
        );
    }

    #[tokio::test]
    async fn test_records_of_other_classes_survive_compaction() {
        let fs = Arc::new(MemoryFs::new());
        fs.write(
            "blocks/a_md.ajson",
            "\"Source:a.md\":{\"path\":\"a.md\"},\n\"Block:a.md#H\":{\"v\":1},\n\"Block:a.md#H\":{\"v\":2},\n",
        )
        .await
        .unwrap();
        let c = open(fs.clone());
        c.load().await.unwrap();
        assert_eq!(c.keys(), vec!["a.md#H"]);
        let raw = fs.contents("blocks/a_md.ajson").unwrap();
        assert!(raw.contains("Source:a.md"));
        assert_eq!(raw.matches("Block:a.md#H").count(), 1);
    }

    /// Holds the first append to `a_md.ajson` until released.
    #[derive(Default)]
    struct GatedFs {
        inner: MemoryFs,
        hold: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl FileSystem for GatedFs {
        async fn read(&self, path: &str) -> Result<String> {
            self.inner.read(path).await
        }
        async fn write(&self, path: &str, contents: &str) -> Result<()> {
            self.inner.write(path, contents).await
        }
        async fn append(&self, path: &str, contents: &str) -> Result<()> {
            if path.ends_with("a_md.ajson") && self.hold.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.append(path, contents).await
        }
        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }
        async fn stat(&self, path: &str) -> Result<FileStat> {
            self.inner.stat(path).await
        }
        async fn mkdir(&self, path: &str) -> Result<()> {
            self.inner.mkdir(path).await
        }
        async fn rename(&self, from: &str, to: &str) -> Result<()> {
            self.inner.rename(from, to).await
        }
        async fn remove(&self, path: &str) -> Result<()> {
            self.inner.remove(path).await
        }
        async fn list(&self, path: &str) -> Result<Listing> {
            self.inner.list(path).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_flushes_keep_record_order() {
        let fs = Arc::new(GatedFs::default());
        let settings = SaveSettings {
            max_parallel_shards: 1,
            ..SaveSettings::default()
        };
        let open_gated = || {
            let adapter = LogStrategy::Sharded.build(fs.clone(), "blocks", &settings);
            Collection::new("blocks", ItemKind::Block, adapter, &settings)
        };
        let c = open_gated();
        c.create_or_update(json!({"path": "a.md#H", "v": 1})).unwrap();
        c.create_or_update(json!({"path": "k.md#H", "v": 1})).unwrap();

        fs.hold.store(true, Ordering::SeqCst);
        let slow = tokio::spawn({
            let c = Arc::clone(&c);
            async move { c.flush(false).await }
        });
        fs.entered.notified().await;

        c.create_or_update(json!({"path": "k.md#H", "v": 2})).unwrap();
        let forced = tokio::spawn({
            let c = Arc::clone(&c);
            async move { c.flush(true).await }
        });
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        fs.release.notify_one();
        slow.await.unwrap().unwrap();
        forced.await.unwrap().unwrap();

        let raw = fs.inner.contents("blocks/k_md.ajson").unwrap();
        let first = raw.find("\"v\":1").unwrap();
        let second = raw.find("\"v\":2").unwrap();
        assert!(first < second, "stale record appended last: {}", raw);

        let reloaded = open_gated();
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.get("k.md#H").unwrap().data["v"], json!(2));
    }
}
