//! Deep-merge rules for item data.
//!
//! Objects merge key by key, recursively. Arrays and scalars are replaced
//! wholesale by the incoming value.

use serde_json::{Map, Value};

/// Merge `source` into `target`.
pub fn deep_merge(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, incoming) in source {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Merge `source` into `target` and report whether the serialized form
/// of `target` changed.
pub fn merge_changed(target: &mut Map<String, Value>, source: &Map<String, Value>) -> bool {
    let before = serde_json::to_string(target).unwrap_or_default();
    deep_merge(target, source);
    let after = serde_json::to_string(target).unwrap_or_default();
    before != after
}
