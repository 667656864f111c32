use anyhow::{Context, Result};
use notestore_core::chunk::ChunkOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::log::LogStrategy;
use crate::store::StoreSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub save: SaveSettings,
    #[serde(default)]
    pub chunking: ChunkOptions,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub strategy: LogStrategy,
}

/// Flush scheduling and log-writing thresholds.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SaveSettings {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// An in-flight flag older than this is treated as stale.
    #[serde(default = "default_in_flight_timeout_ms")]
    pub in_flight_timeout_ms: u64,
    /// A rewritten single-file log smaller than `old_size * min_size_ratio`
    /// is rejected and the old file kept.
    #[serde(default = "default_min_size_ratio")]
    pub min_size_ratio: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_parallel_shards")]
    pub max_parallel_shards: usize,
}

impl Default for SaveSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            in_flight_timeout_ms: default_in_flight_timeout_ms(),
            min_size_ratio: default_min_size_ratio(),
            batch_size: default_batch_size(),
            max_parallel_shards: default_max_parallel_shards(),
        }
    }
}

impl SaveSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn in_flight_timeout(&self) -> Duration {
        Duration::from_millis(self.in_flight_timeout_ms)
    }
}

fn default_debounce_ms() -> u64 {
    10_000
}
fn default_in_flight_timeout_ms() -> u64 {
    10_000
}
fn default_min_size_ratio() -> f64 {
    0.5
}
fn default_batch_size() -> usize {
    1000
}
fn default_max_parallel_shards() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

impl Config {
    /// Config with every optional section at its default.
    pub fn minimal(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig {
                data_dir: data_dir.into(),
                strategy: LogStrategy::default(),
            },
            save: SaveSettings::default(),
            chunking: ChunkOptions::default(),
            connectors: ConnectorsConfig::default(),
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            strategy: self.store.strategy,
            save: self.save.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .validate()
        .with_context(|| "Invalid [chunking] section")?;

    if !(0.0..=1.0).contains(&config.save.min_size_ratio) {
        anyhow::bail!("save.min_size_ratio must be in [0.0, 1.0]");
    }
    if config.save.batch_size == 0 {
        anyhow::bail!("save.batch_size must be > 0");
    }
    if config.save.max_parallel_shards == 0 {
        anyhow::bail!("save.max_parallel_shards must be > 0");
    }
    if config.store.data_dir.as_os_str().is_empty() {
        anyhow::bail!("store.data_dir must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: Config = toml::from_str("[store]\ndata_dir = \"./data\"\n").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.store.strategy, LogStrategy::Sharded);
        assert_eq!(config.save, SaveSettings::default());
        assert_eq!(config.chunking, ChunkOptions::default());
        assert!(config.connectors.filesystem.is_none());
    }

    #[test]
    fn test_full_toml() {
        let toml = r#"
[store]
data_dir = "/tmp/store"
strategy = "single"

[save]
debounce_ms = 250
min_size_ratio = 0.25

[chunking]
embed_input_min_chars = 10
multi_heading_blocks = true

[connectors.filesystem]
root = "/tmp/notes"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.store.strategy, LogStrategy::Single);
        assert_eq!(config.save.debounce(), Duration::from_millis(250));
        assert_eq!(config.save.batch_size, 1000);
        assert_eq!(config.chunking.embed_input_min_chars, 10);
        assert!(config.chunking.multi_heading_blocks);
        assert_eq!(config.chunking.min_length_for_single_line_blocks, 300);
        let fs = config.connectors.filesystem.unwrap();
        assert_eq!(fs.include_globs, vec!["**/*.md"]);
    }

    #[test]
    fn test_rejects_bad_ratio() {
        let mut config = Config::minimal("./data");
        config.save.min_size_ratio = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_bad_chunking() {
        let mut config = Config::minimal("./data");
        config.chunking.embed_input_max_chars = 0;
        let err = validate(&config).unwrap_err();
        assert!(format!("{:#}", err).contains("embed_input_max_chars"));
    }

    #[test]
    fn test_unknown_strategy_fails_to_parse() {
        let parsed: std::result::Result<Config, _> =
            toml::from_str("[store]\ndata_dir = \"d\"\nstrategy = \"btree\"\n");
        assert!(parsed.is_err());
    }
}
