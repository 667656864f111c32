//! Items, item kinds, and weak cross-item references.
//!
//! An [`Item`] is a keyed JSON object owned by exactly one
//! [`Collection`](crate::collection::Collection). Its [`ItemKind`] decides
//! default data and how a key is derived when the caller does not supply
//! one:
//!
//! | Kind | Class name | Key |
//! |------|------------|-----|
//! | `Generic` | `Item` | structural hash of the canonical JSON + its length |
//! | `Source` | `Source` | `data.path` (a document path) |
//! | `Block` | `Block` | `data.path` (`doc.md#H1#H2`, already disambiguated) |
//!
//! Items never hold other items. A reference is an [`ItemRef`], a
//! `{collection_name, key}` pair resolved through the
//! [`StoreHandle`](crate::store::StoreHandle) on demand.

use std::sync::Arc;

use notestore_core::key::derive_key;
use notestore_core::merge::merge_changed;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::store::StoreHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Generic,
    Source,
    Block,
}

impl ItemKind {
    pub fn class_name(self) -> &'static str {
        match self {
            ItemKind::Generic => "Item",
            ItemKind::Source => "Source",
            ItemKind::Block => "Block",
        }
    }

    pub fn from_class_name(name: &str) -> Option<Self> {
        match name {
            "Item" => Some(ItemKind::Generic),
            "Source" => Some(ItemKind::Source),
            "Block" => Some(ItemKind::Block),
            _ => None,
        }
    }

    /// Data every new item of this kind starts from.
    pub fn defaults(self) -> Map<String, Value> {
        match self {
            ItemKind::Source => match json!({ "blocks": [] }) {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            ItemKind::Generic | ItemKind::Block => Map::new(),
        }
    }

    /// Key for `data`, which already has defaults merged in.
    pub fn derive_key(self, data: &Map<String, Value>) -> Option<String> {
        match self {
            ItemKind::Generic => Some(derive_key(&Value::Object(data.clone()))),
            ItemKind::Source | ItemKind::Block => data
                .get("path")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Non-empty and not the literal `"undefined"`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key != "undefined"
}

#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: String,
    pub class_name: String,
    pub collection_name: String,
    pub data: Map<String, Value>,
    pub deleted: bool,
}

impl Item {
    pub(crate) fn new(key: String, kind: ItemKind, collection_name: &str) -> Self {
        let mut data = kind.defaults();
        data.insert("key".to_string(), Value::String(key.clone()));
        Self {
            key,
            class_name: kind.class_name().to_string(),
            collection_name: collection_name.to_string(),
            data,
            deleted: false,
        }
    }

    /// Deep-merge `incoming` into `data`. Returns whether anything changed.
    pub fn update_data(&mut self, incoming: &Map<String, Value>) -> bool {
        merge_changed(&mut self.data, incoming)
    }

    /// Key used in the log: `Class:key`.
    pub fn record_key(&self) -> String {
        record_key(&self.class_name, &self.key)
    }

    /// Whether the item carries anything worth writing beyond its key.
    pub fn is_persistable(&self) -> bool {
        !self.deleted && self.data.keys().any(|k| k != "key")
    }

    pub fn item_ref(&self) -> ItemRef {
        ItemRef::new(&self.collection_name, &self.key)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

pub(crate) fn record_key(class_name: &str, key: &str) -> String {
    format!("{}:{}", class_name, key)
}

/// Weak reference to an item in another (or the same) collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub collection_name: String,
    pub key: String,
}

impl ItemRef {
    pub fn new(collection_name: &str, key: &str) -> Self {
        Self {
            collection_name: collection_name.to_string(),
            key: key.to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({ "collection_name": self.collection_name, "key": self.key })
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Look the item up now. `None` if the collection or item is gone.
    pub fn resolve(&self, handle: &StoreHandle) -> Option<Item> {
        handle.resolve(self)
    }

    pub fn collection(&self, handle: &StoreHandle) -> Option<Arc<crate::collection::Collection>> {
        handle.collection(&self.collection_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_class_names_round_trip() {
        for kind in [ItemKind::Generic, ItemKind::Source, ItemKind::Block] {
            assert_eq!(ItemKind::from_class_name(kind.class_name()), Some(kind));
        }
        assert_eq!(ItemKind::from_class_name("Widget"), None);
    }

    #[test]
    fn test_block_key_is_path() {
        let data = obj(json!({"path": "notes/a.md#Intro", "length": 3}));
        assert_eq!(
            ItemKind::Block.derive_key(&data).as_deref(),
            Some("notes/a.md#Intro")
        );
        assert_eq!(ItemKind::Block.derive_key(&obj(json!({"length": 3}))), None);
    }

    #[test]
    fn test_generic_key_is_stable_under_field_order() {
        let a = obj(json!({"a": 1, "b": {"c": 2, "d": 3}}));
        let b = obj(json!({"b": {"d": 3, "c": 2}, "a": 1}));
        let ka = ItemKind::Generic.derive_key(&a).unwrap();
        assert_eq!(Some(ka.clone()), ItemKind::Generic.derive_key(&b));
        assert!(is_valid_key(&ka));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("undefined"));
        assert!(is_valid_key("notes/a.md"));
    }

    #[test]
    fn test_new_item_and_persistable() {
        let mut item = Item::new("k".into(), ItemKind::Generic, "items");
        assert_eq!(item.record_key(), "Item:k");
        assert!(!item.is_persistable());
        assert!(item.update_data(&obj(json!({"title": "x"}))));
        assert!(item.is_persistable());
        assert!(!item.update_data(&obj(json!({"title": "x"}))));
        item.deleted = true;
        assert!(!item.is_persistable());
    }

    #[test]
    fn test_source_defaults() {
        let item = Item::new("a.md".into(), ItemKind::Source, "sources");
        assert_eq!(item.data["blocks"], json!([]));
        assert_eq!(item.data["key"], json!("a.md"));
    }

    #[test]
    fn test_item_ref_value_shape() {
        let r = ItemRef::new("sources", "notes/a.md");
        let v = r.to_value();
        assert_eq!(v, json!({"collection_name": "sources", "key": "notes/a.md"}));
        assert_eq!(ItemRef::from_value(&v), Some(r));
        assert_eq!(ItemRef::from_value(&json!("notes/a.md")), None);
    }
}
