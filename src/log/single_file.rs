use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use notestore_core::fs::{parent, FileSystem};
use notestore_core::record::{encode_records, parse_log};
use tokio::sync::Mutex;

use super::{LoadStats, LogAdapter, SaveOutcome};
use crate::collection::Collection;
use crate::config::SaveSettings;

/// The whole collection in one `.ajson` file, rewritten on every save.
///
/// A save writes every persistable item to `<path>.temp` in batches, then
/// compares sizes: a temp file smaller than `min_size_ratio` of the current
/// file is discarded and the current file kept. Otherwise the temp file
/// replaces the current one with a single rename. If writing fails the temp
/// file is kept as `<path>.failed-<unix millis>`.
pub struct SingleFileLog {
    fs: Arc<dyn FileSystem>,
    path: String,
    batch_size: usize,
    min_size_ratio: f64,
    write_lock: Mutex<()>,
}

impl SingleFileLog {
    pub fn new(fs: Arc<dyn FileSystem>, path: String, settings: &SaveSettings) -> Self {
        Self {
            fs,
            path,
            batch_size: settings.batch_size.max(1),
            min_size_ratio: settings.min_size_ratio,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn temp_path(&self) -> String {
        format!("{}.temp", self.path)
    }

    async fn rewrite(&self, collection: &Collection, temp: &str) -> Result<SaveOutcome> {
        let records = collection.persistable_records();

        self.fs.write(temp, "").await?;
        for batch in records.chunks(self.batch_size) {
            let encoded = encode_records(batch.iter().map(|(k, v)| (k.as_str(), Some(v))));
            self.fs.append(temp, &encoded).await?;
        }

        let new_size = self.fs.stat(temp).await?.size;
        let old_size = if self.fs.exists(&self.path).await? {
            self.fs.stat(&self.path).await?.size
        } else {
            0
        };

        if (new_size as f64) < (old_size as f64) * self.min_size_ratio {
            tracing::warn!(
                path = %self.path,
                new_size,
                old_size,
                "rewritten log is too small; keeping the previous file"
            );
            if let Err(e) = self.fs.remove(temp).await {
                tracing::warn!(path = %temp, error = %e, "failed to remove rejected temp file");
            }
            return Ok(SaveOutcome::Rejected { new_size, old_size });
        }

        self.fs.rename(temp, &self.path).await?;
        Ok(SaveOutcome::Written {
            records: records.len(),
        })
    }

    async fn preserve_failed(&self, temp: &str) -> Option<String> {
        if !self.fs.exists(temp).await.unwrap_or(false) {
            return None;
        }
        let failed = format!(
            "{}.failed-{}",
            self.path,
            chrono::Utc::now().timestamp_millis()
        );
        match self.fs.rename(temp, &failed).await {
            Ok(()) => Some(failed),
            Err(e) => {
                tracing::error!(path = %temp, error = %e, "failed to preserve temp file");
                None
            }
        }
    }
}

#[async_trait]
impl LogAdapter for SingleFileLog {
    async fn load(&self, collection: &Collection) -> Result<LoadStats> {
        if !self.fs.exists(&self.path).await? {
            let dir = parent(&self.path);
            if !dir.is_empty() {
                self.fs.mkdir(dir).await?;
            }
            self.fs
                .write(&self.path, "")
                .await
                .with_context(|| format!("Failed to create log file: {}", self.path))?;
            return Ok(LoadStats {
                files: 1,
                ..LoadStats::default()
            });
        }

        let contents = match self.fs.read(&self.path).await {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(path = %self.path, error = %e, "skipping unreadable log file");
                return Ok(LoadStats {
                    skipped_files: 1,
                    ..LoadStats::default()
                });
            }
        };

        let entries = parse_log(&contents, self.batch_size);
        for error in &entries.errors {
            tracing::warn!(path = %self.path, error = %error, "skipping malformed record");
        }
        let records = collection.apply_loaded(
            entries
                .records
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_ref())),
        );

        Ok(LoadStats {
            files: 1,
            records,
            bad_records: entries.errors.len(),
            ..LoadStats::default()
        })
    }

    async fn save(&self, collection: &Collection, force: bool) -> Result<SaveOutcome> {
        let _write = self.write_lock.lock().await;

        let pending = collection.take_save_queue();
        if pending.is_empty() && !force {
            return Ok(SaveOutcome::Clean);
        }

        let temp = self.temp_path();
        match self.rewrite(collection, &temp).await {
            Ok(outcome) => {
                if matches!(outcome, SaveOutcome::Rejected { .. }) {
                    collection.requeue(pending);
                }
                Ok(outcome)
            }
            Err(e) => {
                let preserved = self.preserve_failed(&temp).await;
                collection.requeue(pending);
                tracing::error!(
                    path = %self.path,
                    preserved = ?preserved,
                    error = %e,
                    "log rewrite failed"
                );
                Err(e.context(format!("Failed to write log file: {}", self.path)))
            }
        }
    }
}
