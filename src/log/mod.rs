//! Log-structured persistence for collections.
//!
//! Both strategies write the `.ajson` record format from
//! [`notestore_core::record`] through a [`FileSystem`] and share one
//! failure posture: missing files are created, a file that cannot be read
//! is skipped with a warning, and a failed flush puts its records back on
//! the collection's save queue.
//!
//! | Strategy | Layout | Save | Compaction |
//! |----------|--------|------|------------|
//! | [`SingleFileLog`] | `<name>.ajson` | rewrite via temp file + size guard | every save |
//! | [`ShardedLog`] | `<name>/<shard>.ajson` | append dirty records per shard | every load |

mod sharded;
mod single_file;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use notestore_core::fs::FileSystem;
use notestore_core::record::LOG_EXTENSION;
use serde::Deserialize;

use crate::collection::Collection;
use crate::config::SaveSettings;

pub use sharded::ShardedLog;
pub use single_file::SingleFileLog;

/// What a flush did. I/O failures are reported as `Err` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Nothing was dirty.
    Clean,
    Written { records: usize },
    /// Another flush was in flight.
    Skipped,
    /// The rewritten log was suspiciously small; the previous file was kept
    /// and the dirty records requeued.
    Rejected { new_size: u64, old_size: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub files: usize,
    pub records: usize,
    pub skipped_files: usize,
    pub bad_records: usize,
    pub compacted_files: usize,
}

impl LoadStats {
    pub(crate) fn absorb(&mut self, other: LoadStats) {
        self.files += other.files;
        self.records += other.records;
        self.skipped_files += other.skipped_files;
        self.bad_records += other.bad_records;
        self.compacted_files += other.compacted_files;
    }
}

#[async_trait]
pub trait LogAdapter: Send + Sync {
    /// Read the log into `collection`.
    async fn load(&self, collection: &Collection) -> Result<LoadStats>;

    /// Persist the collection's dirty records.
    async fn save(&self, collection: &Collection, force: bool) -> Result<SaveOutcome>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStrategy {
    Single,
    #[default]
    Sharded,
}

impl LogStrategy {
    pub fn build(
        self,
        fs: Arc<dyn FileSystem>,
        collection_name: &str,
        settings: &SaveSettings,
    ) -> Arc<dyn LogAdapter> {
        match self {
            LogStrategy::Single => Arc::new(SingleFileLog::new(
                fs,
                format!("{}.{}", collection_name, LOG_EXTENSION),
                settings,
            )),
            LogStrategy::Sharded => {
                Arc::new(ShardedLog::new(fs, collection_name.to_string(), settings))
            }
        }
    }
}
