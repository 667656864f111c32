//! In-memory collections of items.
//!
//! A [`Collection`] is the single authority over its items: it derives
//! keys, applies deep-merge updates, validates, tombstones deletions and
//! tracks which keys are dirty. Its [`LogAdapter`] only ever sees snapshots
//! taken through the crate-internal `take_save_queue` /
//! `persistable_records` calls, and writes loaded records back through
//! `apply_loaded`.
//!
//! # Item lifecycle
//!
//! ```text
//! create_or_update ─▶ registered ⇄ dirty ─▶ persisted
//!                          │
//!                       delete ─▶ tombstone pending ─▶ persisted as null
//! ```
//!
//! There is no un-delete. `create_or_update` with a tombstoned key starts a
//! fresh item under the same key.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use notestore_core::filter::FilterOpts;
use notestore_core::merge::deep_merge;
use serde_json::Value;

use crate::config::SaveSettings;
use crate::item::{is_valid_key, record_key, Item, ItemKind};
use crate::log::{LoadStats, LogAdapter, SaveOutcome};
use crate::scheduler::SaveScheduler;

#[derive(Debug, Default)]
struct CollectionState {
    items: BTreeMap<String, Item>,
    save_queue: BTreeSet<String>,
    /// Deleted keys whose null record has not been written yet.
    tombstones: BTreeSet<String>,
}

/// A dirty key as captured for one flush. `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingRecord {
    pub key: String,
    pub record_key: String,
    pub value: Option<Value>,
}

pub struct Collection {
    name: String,
    kind: ItemKind,
    state: RwLock<CollectionState>,
    adapter: Arc<dyn LogAdapter>,
    scheduler: SaveScheduler,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}

impl Collection {
    pub fn new(
        name: &str,
        kind: ItemKind,
        adapter: Arc<dyn LogAdapter>,
        settings: &SaveSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            state: RwLock::new(CollectionState::default()),
            adapter,
            scheduler: SaveScheduler::from_settings(settings),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, CollectionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CollectionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn class_name(&self) -> &'static str {
        self.kind.class_name()
    }

    /// Create an item from `data`, or merge `data` into the existing item
    /// with the same key.
    ///
    /// The key is `data.key` when present, otherwise derived by the
    /// collection's [`ItemKind`] from `data` merged over the kind's
    /// defaults. Returns `None` (and logs a warning) when `data` is not an
    /// object or no valid key can be found. Merging identical data into an
    /// existing item leaves it clean.
    pub fn create_or_update(&self, data: Value) -> Option<Item> {
        let Value::Object(incoming) = data else {
            tracing::warn!(collection = %self.name, "rejected item: data is not an object");
            return None;
        };

        let key = match incoming.get("key") {
            Some(Value::String(key)) => Some(key.clone()),
            Some(_) => None,
            None => {
                let mut scratch = self.kind.defaults();
                deep_merge(&mut scratch, &incoming);
                self.kind.derive_key(&scratch)
            }
        };
        let Some(key) = key.filter(|k| is_valid_key(k)) else {
            tracing::warn!(
                collection = %self.name,
                class = self.class_name(),
                "rejected item: no valid key"
            );
            return None;
        };

        let mut guard = self.write();
        let state = &mut *guard;
        if let Some(existing) = state.items.get_mut(&key) {
            let changed = existing.update_data(&incoming);
            let item = existing.clone();
            if changed {
                state.save_queue.insert(key);
            }
            return Some(item);
        }

        let mut item = Item::new(key.clone(), self.kind, &self.name);
        item.update_data(&incoming);
        item.data.insert("key".to_string(), Value::String(key.clone()));
        state.tombstones.remove(&key);
        state.items.insert(key.clone(), item.clone());
        state.save_queue.insert(key);
        Some(item)
    }

    /// Deep-merge `data` into the item at `key`. Returns whether anything
    /// changed; `false` for unknown keys or non-object data.
    pub fn update_data(&self, key: &str, data: &Value) -> bool {
        let Value::Object(incoming) = data else {
            return false;
        };
        let mut state = self.write();
        let changed = match state.items.get_mut(key) {
            Some(item) => item.update_data(incoming),
            None => false,
        };
        if changed {
            state.save_queue.insert(key.to_string());
        }
        changed
    }

    /// Remove the item from the live view and queue its tombstone.
    pub fn delete(&self, key: &str) -> bool {
        let mut guard = self.write();
        let state = &mut *guard;
        match state.items.remove(key) {
            Some(mut item) => {
                item.deleted = true;
                state.tombstones.insert(item.key.clone());
                state.save_queue.insert(item.key);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Item> {
        self.read().items.get(key).cloned()
    }

    /// Items matching `opts`, in key order.
    pub fn filter(&self, opts: &FilterOpts) -> Vec<Item> {
        let state = self.read();
        let matching = state
            .items
            .values()
            .filter(|item| opts.matches(&item.key))
            .cloned();
        match opts.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Keys matching `opts`, in key order.
    pub fn list(&self, opts: &FilterOpts) -> Vec<String> {
        let state = self.read();
        let matching = state.items.keys().filter(|k| opts.matches(k)).cloned();
        match opts.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Mark `key` dirty without scheduling a flush.
    pub fn queue_save(&self, key: &str) {
        self.write().save_queue.insert(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.read().items.keys().cloned().collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.read().save_queue.len()
    }

    pub fn is_saving(&self) -> bool {
        self.scheduler.is_saving()
    }

    pub fn is_save_scheduled(&self) -> bool {
        self.scheduler.is_scheduled()
    }

    /// Populate the collection from its log.
    pub async fn load(&self) -> Result<LoadStats> {
        self.adapter.load(self).await
    }

    /// Debounced flush. Repeated calls within the debounce window collapse
    /// into one flush; a flush that finds another in flight reschedules.
    pub fn save(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.scheduler.schedule(move |generation| async move {
            let Some(collection) = weak.upgrade() else {
                return;
            };
            if !collection.scheduler.fired(generation) {
                return;
            }
            match collection.flush(false).await {
                Ok(SaveOutcome::Skipped) => collection.save(),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(collection = %collection.name, error = %e, "debounced save failed");
                }
            }
        });
    }

    /// Flush now, cancelling any pending debounced save.
    ///
    /// Without `force`, returns [`SaveOutcome::Skipped`] while another flush
    /// is in flight. `force` also rewrites a single-file log with nothing
    /// dirty.
    pub async fn flush(&self, force: bool) -> Result<SaveOutcome> {
        let Some(_in_flight) = self.scheduler.begin(force) else {
            tracing::debug!(collection = %self.name, "save already in flight");
            return Ok(SaveOutcome::Skipped);
        };
        self.scheduler.cancel();
        self.adapter.save(self, force).await
    }

    /// Drain the save queue into records. Keys that are neither live nor
    /// tombstoned (or live with nothing to persist) are dropped.
    pub(crate) fn take_save_queue(&self) -> Vec<PendingRecord> {
        let mut guard = self.write();
        let state = &mut *guard;
        let queue = std::mem::take(&mut state.save_queue);
        let mut records = Vec::with_capacity(queue.len());
        for key in queue {
            let value = match state.items.get(&key) {
                Some(item) if item.is_persistable() => Some(Value::Object(item.data.clone())),
                Some(_) => continue,
                None if state.tombstones.remove(&key) => None,
                None => continue,
            };
            records.push(PendingRecord {
                record_key: record_key(self.class_name(), &key),
                key,
                value,
            });
        }
        records
    }

    /// Put records from a failed or rejected flush back on the queue.
    pub(crate) fn requeue(&self, records: Vec<PendingRecord>) {
        let mut state = self.write();
        for record in records {
            if record.value.is_none() && !state.items.contains_key(&record.key) {
                state.tombstones.insert(record.key.clone());
            }
            state.save_queue.insert(record.key);
        }
    }

    /// Every live item worth writing, as `(record_key, data)`, in key order.
    pub(crate) fn persistable_records(&self) -> Vec<(String, Value)> {
        self.read()
            .items
            .values()
            .filter(|item| item.is_persistable())
            .map(|item| (item.record_key(), Value::Object(item.data.clone())))
            .collect()
    }

    /// Apply records read from a log. Records of other classes are ignored,
    /// as are keys with unsaved in-memory changes. Returns how many records
    /// were applied. Nothing is queued.
    pub(crate) fn apply_loaded<'a, I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, Option<&'a Value>)>,
    {
        let mut state = self.write();
        let mut applied = 0;
        for (record_key, value) in records {
            let Some((class, key)) = record_key.split_once(':') else {
                continue;
            };
            if class != self.class_name() || state.save_queue.contains(key) {
                continue;
            }
            match value {
                Some(Value::Object(data)) => {
                    let mut item = Item::new(key.to_string(), self.kind, &self.name);
                    item.data = data.clone();
                    item.data
                        .insert("key".to_string(), Value::String(key.to_string()));
                    state.items.insert(key.to_string(), item);
                    applied += 1;
                }
                Some(other) => {
                    tracing::warn!(
                        collection = %self.name,
                        key,
                        kind = ?other,
                        "ignoring non-object record"
                    );
                }
                None => {
                    state.items.remove(key);
                    applied += 1;
                }
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogStrategy;
    use notestore_core::fs::memory::MemoryFs;
    use notestore_core::fs::FileSystem;
    use serde_json::json;
    use std::time::Duration;

    fn settings() -> SaveSettings {
        SaveSettings {
            debounce_ms: 50,
            ..SaveSettings::default()
        }
    }

    fn collection(kind: ItemKind) -> (Arc<MemoryFs>, Arc<Collection>) {
        let fs = Arc::new(MemoryFs::new());
        let adapter = LogStrategy::Sharded.build(fs.clone(), "items", &settings());
        (fs, Collection::new("items", kind, adapter, &settings()))
    }

    #[test]
    fn test_create_with_derived_key() {
        let (_, c) = collection(ItemKind::Generic);
        let item = c.create_or_update(json!({"title": "a", "n": 1})).unwrap();
        assert_eq!(item.class_name, "Item");
        assert_eq!(item.collection_name, "items");
        assert_eq!(item.data["key"], json!(item.key));
        assert_eq!(c.len(), 1);
        assert_eq!(c.dirty_count(), 1);

        let same = c.create_or_update(json!({"n": 1, "title": "a"})).unwrap();
        assert_eq!(same.key, item.key);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_explicit_key_wins() {
        let (_, c) = collection(ItemKind::Block);
        let item = c
            .create_or_update(json!({"key": "k1", "path": "a.md#H"}))
            .unwrap();
        assert_eq!(item.key, "k1");
    }

    #[test]
    fn test_invalid_items_are_rejected() {
        let (_, c) = collection(ItemKind::Block);
        assert!(c.create_or_update(json!({"length": 3})).is_none());
        assert!(c.create_or_update(json!({"path": ""})).is_none());
        assert!(c.create_or_update(json!({"key": "undefined"})).is_none());
        assert!(c.create_or_update(json!({"key": 7})).is_none());
        assert!(c.create_or_update(json!(["not", "an", "object"])).is_none());
        assert!(c.is_empty());
        assert_eq!(c.dirty_count(), 0);
    }

    #[tokio::test]
    async fn test_identical_update_is_not_queued() {
        let (_, c) = collection(ItemKind::Block);
        let data = json!({"path": "a.md#H", "meta": {"tags": ["x"]}});
        c.create_or_update(data.clone()).unwrap();
        assert_eq!(c.dirty_count(), 1);
        c.flush(false).await.unwrap();
        assert_eq!(c.dirty_count(), 0);

        c.create_or_update(data).unwrap();
        assert_eq!(c.dirty_count(), 0);

        c.create_or_update(json!({"path": "a.md#H", "meta": {"tags": ["y"]}}))
            .unwrap();
        assert_eq!(c.dirty_count(), 1);
    }

    #[test]
    fn test_update_merges_nested_and_replaces_arrays() {
        let (_, c) = collection(ItemKind::Block);
        c.create_or_update(json!({"path": "p", "meta": {"a": 1, "list": [1, 2]}}))
            .unwrap();
        assert!(c.update_data("p", &json!({"meta": {"b": 2, "list": [3]}})));
        let item = c.get("p").unwrap();
        assert_eq!(item.data["meta"], json!({"a": 1, "b": 2, "list": [3]}));
        assert!(!c.update_data("p", &json!({"meta": {"b": 2}})));
        assert!(!c.update_data("missing", &json!({"x": 1})));
    }

    #[test]
    fn test_delete_queues_tombstone() {
        let (_, c) = collection(ItemKind::Block);
        c.create_or_update(json!({"path": "a"})).unwrap();
        c.take_save_queue();

        assert!(c.delete("a"));
        assert!(!c.delete("a"));
        assert!(c.get("a").is_none());

        let records = c.take_save_queue();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record_key, "Block:a");
        assert_eq!(records[0].value, None);
        assert!(c.take_save_queue().is_empty());
    }

    #[test]
    fn test_recreate_after_delete_is_fresh() {
        let (_, c) = collection(ItemKind::Block);
        c.create_or_update(json!({"path": "a", "old": true})).unwrap();
        c.delete("a");
        let item = c.create_or_update(json!({"path": "a"})).unwrap();
        assert!(!item.data.contains_key("old"));
        assert!(!item.deleted);

        let records = c.take_save_queue();
        assert_eq!(records.len(), 1);
        assert!(records[0].value.is_some());
    }

    #[test]
    fn test_requeue_restores_tombstone() {
        let (_, c) = collection(ItemKind::Block);
        c.create_or_update(json!({"path": "a"})).unwrap();
        c.delete("a");
        let records = c.take_save_queue();
        c.requeue(records.clone());
        assert_eq!(c.take_save_queue(), records);
    }

    #[test]
    fn test_take_save_queue_drains_live_and_deleted_keys() {
        let (_, c) = collection(ItemKind::Block);
        c.create_or_update(json!({"path": "live", "v": 1})).unwrap();
        c.create_or_update(json!({"path": "gone"})).unwrap();
        c.delete("gone");
        c.queue_save("never-existed");

        let records = c.take_save_queue();
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["gone", "live"]);
        assert_eq!(records[0].value, None);
        assert_eq!(records[1].value.as_ref().unwrap()["v"], json!(1));
        assert_eq!(c.dirty_count(), 0);
        assert!(c.take_save_queue().is_empty());
    }

    #[test]
    fn test_filter_and_list() {
        let (_, c) = collection(ItemKind::Block);
        for path in ["a.md#One", "a.md#Two", "b.md#One", "b.md#"] {
            c.create_or_update(json!({"path": path, "x": 1})).unwrap();
        }
        let opts = FilterOpts {
            key_starts_with: Some("a.md#".into()),
            exclude_key_includes: Some("Two".into()),
            ..Default::default()
        };
        assert_eq!(c.list(&opts), vec!["a.md#One"]);

        let opts = FilterOpts {
            key_ends_with: Some("One".into()),
            limit: Some(1),
            ..Default::default()
        };
        let items = c.filter(&opts);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "a.md#One");
    }

    #[test]
    fn test_apply_loaded_skips_other_classes_and_dirty_keys() {
        let (_, c) = collection(ItemKind::Block);
        c.create_or_update(json!({"path": "dirty", "v": "memory"}))
            .unwrap();
        let disk = [
            ("Block:a", Some(json!({"path": "a"}))),
            ("Source:a", Some(json!({"path": "a"}))),
            ("Block:dirty", Some(json!({"path": "dirty", "v": "disk"}))),
            ("Block:b", Some(json!(3))),
            ("no-class", Some(json!({}))),
        ];
        let applied = c.apply_loaded(disk.iter().map(|(k, v)| (*k, v.as_ref())));
        assert_eq!(applied, 1);
        assert_eq!(c.keys(), vec!["a", "dirty"]);
        assert_eq!(c.get("dirty").unwrap().data["v"], json!("memory"));
        assert_eq!(c.dirty_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_save_writes_once() {
        let (fs, c) = collection(ItemKind::Block);
        for i in 0..3 {
            c.create_or_update(json!({"path": format!("note.md#{}", i), "v": i}))
                .unwrap();
            c.save();
        }
        assert!(c.is_save_scheduled());
        assert!(!fs.exists("items/note_md.ajson").await.unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!c.is_save_scheduled());
        assert_eq!(c.dirty_count(), 0);
        let log = fs.contents("items/note_md.ajson").unwrap();
        assert_eq!(log.matches(",\n").count(), 3);
    }

    #[tokio::test]
    async fn test_flush_skips_while_in_flight() {
        let (_, c) = collection(ItemKind::Block);
        c.create_or_update(json!({"path": "a", "v": 1})).unwrap();
        let _held = c.scheduler.begin(false).unwrap();
        assert_eq!(c.flush(false).await.unwrap(), SaveOutcome::Skipped);
        assert_eq!(c.dirty_count(), 1);
        assert!(matches!(
            c.flush(true).await.unwrap(),
            SaveOutcome::Written { records: 1 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_save_retries_after_in_flight_flush() {
        let (fs, c) = collection(ItemKind::Block);
        c.create_or_update(json!({"path": "busy.md#H", "v": 1}))
            .unwrap();
        let held = c.scheduler.begin(false).unwrap();
        c.save();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(c.is_save_scheduled());
        assert_eq!(c.dirty_count(), 1);
        assert!(!fs.exists("items/busy_md.ajson").await.unwrap());

        drop(held);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!c.is_save_scheduled());
        assert_eq!(c.dirty_count(), 0);
        let log = fs.contents("items/busy_md.ajson").unwrap();
        assert_eq!(log.matches(",\n").count(), 1);
    }
}
