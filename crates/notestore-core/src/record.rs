//! `.ajson` append-log codec.
//!
//! A log file is a sequence of JSON object fragments, each terminated by
//! `,\n`:
//!
//! ```text
//! "Block:notes/a.md#Intro":{"length":42},
//! "Block:notes/a.md#Old":null,
//! ```
//!
//! Wrapped in `{ … }` (minus the final comma) the file is a JSON object.
//! A `null` value is a tombstone. When a key appears more than once the
//! last record in file order wins.
//!
//! Parsing happens in batches of records so very large logs never need a
//! single giant JSON document in memory. A batch that fails to parse is
//! re-read record by record and only the malformed records are dropped.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

/// Separator written after every record.
pub const RECORD_DELIMITER: &str = ",\n";

/// File extension for log files.
pub const LOG_EXTENSION: &str = "ajson";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed record #{index}: {source}")]
    Malformed {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("record #{index} is not a single key/value pair")]
    NotAPair { index: usize },
}

/// Encode one record, including the trailing delimiter.
pub fn encode_record(key: &str, value: Option<&Value>) -> String {
    let key = serde_json::to_string(key).unwrap_or_else(|_| "\"\"".to_string());
    let value = value.map_or_else(|| "null".to_string(), Value::to_string);
    format!("{}:{}{}", key, value, RECORD_DELIMITER)
}

/// Encode many records in order.
pub fn encode_records<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = (&'a str, Option<&'a Value>)>,
{
    records
        .into_iter()
        .map(|(k, v)| encode_record(k, v))
        .collect()
}

/// The compacted view of a log: the last value per key.
#[derive(Debug, Default)]
pub struct LogEntries {
    /// `None` marks a tombstone.
    pub records: BTreeMap<String, Option<Value>>,
    /// Number of raw records read, including superseded ones.
    pub total: usize,
    pub errors: Vec<RecordError>,
}

impl LogEntries {
    /// Keys with a live (non-tombstone) value.
    pub fn live(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.records
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.as_str(), v)))
    }

    pub fn tombstones(&self) -> usize {
        self.records.values().filter(|v| v.is_none()).count()
    }

    /// Re-encode only the live records, in key order.
    pub fn encode_live(&self) -> String {
        encode_records(self.live().map(|(k, v)| (k, Some(v))))
    }

    /// Whether re-encoding would change the file: superseded records,
    /// tombstones, or dropped malformed records are present.
    pub fn is_compactable(&self) -> bool {
        self.total != self.records.len() || self.tombstones() > 0 || !self.errors.is_empty()
    }
}

/// Parse log `contents`, `batch_size` records at a time.
pub fn parse_log(contents: &str, batch_size: usize) -> LogEntries {
    let fragments: Vec<&str> = contents
        .split(RECORD_DELIMITER)
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();

    let mut entries = LogEntries::default();
    let batch_size = batch_size.max(1);

    for (batch_no, batch) in fragments.chunks(batch_size).enumerate() {
        let offset = batch_no * batch_size;
        match parse_batch(batch) {
            Ok(map) => {
                entries.total += batch.len();
                for (key, value) in map {
                    entries.records.insert(key, null_as_none(value));
                }
            }
            Err(_) => {
                for (i, fragment) in batch.iter().enumerate() {
                    match parse_fragment(fragment, offset + i) {
                        Ok((key, value)) => {
                            entries.total += 1;
                            entries.records.insert(key, null_as_none(value));
                        }
                        Err(e) => entries.errors.push(e),
                    }
                }
            }
        }
    }

    entries
}

/// Parse a batch as one `{ … }` object. Duplicate keys inside the batch
/// resolve to the later record.
fn parse_batch(batch: &[&str]) -> Result<Map<String, Value>, serde_json::Error> {
    serde_json::from_str(&format!("{{{}}}", batch.join(",")))
}

fn parse_fragment(fragment: &str, index: usize) -> Result<(String, Value), RecordError> {
    let map: Map<String, Value> = serde_json::from_str(&format!("{{{}}}", fragment))
        .map_err(|source| RecordError::Malformed { index, source })?;
    let mut iter = map.into_iter();
    match (iter.next(), iter.next()) {
        (Some(pair), None) => Ok(pair),
        _ => Err(RecordError::NotAPair { index }),
    }
}

fn null_as_none(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        v => Some(v),
    }
}
