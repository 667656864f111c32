//! The store handle: filesystem capability plus the collection registry.
//!
//! Everything a collection needs from its surroundings is passed in here
//! at construction. There is no global state; two handles over two
//! filesystems are fully independent.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use notestore_core::fs::FileSystem;

use crate::collection::Collection;
use crate::config::SaveSettings;
use crate::item::{Item, ItemKind, ItemRef};
use crate::log::{LoadStats, LogStrategy, SaveOutcome};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSettings {
    pub strategy: LogStrategy,
    pub save: SaveSettings,
}

pub struct StoreHandle {
    fs: Arc<dyn FileSystem>,
    settings: StoreSettings,
    collections: RwLock<BTreeMap<String, Arc<Collection>>>,
}

impl StoreHandle {
    pub fn open(fs: Arc<dyn FileSystem>, settings: StoreSettings) -> Self {
        Self {
            fs,
            settings,
            collections: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Register a collection, or return the existing one with that name.
    pub fn register(&self, name: &str, kind: ItemKind) -> Arc<Collection> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = collections.get(name) {
            if existing.kind() != kind {
                tracing::warn!(
                    collection = name,
                    registered = existing.class_name(),
                    requested = kind.class_name(),
                    "collection already registered with another kind"
                );
            }
            return Arc::clone(existing);
        }

        let adapter = self
            .settings
            .strategy
            .build(Arc::clone(&self.fs), name, &self.settings.save);
        let collection = Collection::new(name, kind, adapter, &self.settings.save);
        collections.insert(name.to_string(), Arc::clone(&collection));
        collection
    }

    pub fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn collections(&self) -> Vec<Arc<Collection>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn resolve(&self, item_ref: &ItemRef) -> Option<Item> {
        self.collection(&item_ref.collection_name)?
            .get(&item_ref.key)
    }

    /// Load every registered collection. A collection that fails to load
    /// fails the whole call; unreadable files inside one are skipped.
    pub async fn load_all(&self) -> Result<LoadStats> {
        let mut total = LoadStats::default();
        for collection in self.collections() {
            let stats = collection
                .load()
                .await
                .with_context(|| format!("Failed to load collection: {}", collection.name()))?;
            tracing::debug!(
                collection = collection.name(),
                records = stats.records,
                skipped = stats.skipped_files,
                "collection loaded"
            );
            total.absorb(stats);
        }
        Ok(total)
    }

    /// Force-flush every collection. All collections are attempted; the
    /// first error is returned after the rest have been flushed.
    pub async fn flush_all(&self) -> Result<Vec<(String, SaveOutcome)>> {
        let mut outcomes = Vec::new();
        let mut first_error = None;
        for collection in self.collections() {
            match collection.flush(true).await {
                Ok(outcome) => outcomes.push((collection.name().to_string(), outcome)),
                Err(e) => {
                    tracing::error!(collection = collection.name(), error = %e, "flush failed");
                    first_error.get_or_insert(
                        e.context(format!("Failed to flush collection: {}", collection.name())),
                    );
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }
}
