//! Structural item keys.
//!
//! The default key of an item is a short, non-cryptographic hash of its
//! canonical JSON followed by the canonical JSON's length. Canonical JSON
//! sorts object keys at every depth, so two values that differ only in key
//! order share a key.

use serde_json::{Map, Value};

/// Serialize `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&sorted(value)).unwrap_or_default()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), sorted(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// 32-bit rolling string hash (`h = h * 31 + c`).
pub fn structural_hash(s: &str) -> u32 {
    s.chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

/// Key for `value`: hex hash of the canonical JSON, then its length.
pub fn derive_key(value: &Value) -> String {
    let canonical = canonical_json(value);
    format!("{:x}{}", structural_hash(&canonical), canonical.len())
}
