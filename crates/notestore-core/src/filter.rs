//! Key predicates for collection scans.
//!
//! Every populated option must hold for a key to match (AND semantics).
//! Unset options are ignored.

use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FilterOpts {
    pub exclude_key: Option<String>,
    pub exclude_keys: Vec<String>,
    pub exclude_key_starts_with: Option<String>,
    pub exclude_key_starts_with_any: Vec<String>,
    pub exclude_key_includes: Option<String>,
    pub key_starts_with: Option<String>,
    pub key_starts_with_any: Vec<String>,
    pub key_ends_with: Option<String>,
    pub key_includes: Option<String>,
    /// Stop after this many matches.
    pub limit: Option<usize>,
}

impl FilterOpts {
    pub fn key_starts_with(prefix: impl Into<String>) -> Self {
        Self {
            key_starts_with: Some(prefix.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        if self.exclude_key.as_deref() == Some(key) {
            return false;
        }
        if self.exclude_keys.iter().any(|k| k == key) {
            return false;
        }
        if let Some(prefix) = &self.exclude_key_starts_with {
            if key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if self
            .exclude_key_starts_with_any
            .iter()
            .any(|p| key.starts_with(p.as_str()))
        {
            return false;
        }
        if let Some(needle) = &self.exclude_key_includes {
            if key.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.key_starts_with {
            if !key.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if !self.key_starts_with_any.is_empty()
            && !self
                .key_starts_with_any
                .iter()
                .any(|p| key.starts_with(p.as_str()))
        {
            return false;
        }
        if let Some(suffix) = &self.key_ends_with {
            if !key.ends_with(suffix.as_str()) {
                return false;
            }
        }
        if let Some(needle) = &self.key_includes {
            if !key.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}
