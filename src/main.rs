//! # notestore CLI (`nstore`)
//!
//! ## Usage
//!
//! ```bash
//! nstore --config ./config/nstore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nstore init` | Create the store directory |
//! | `nstore chunks <file>` | Parse a Markdown file and print its blocks as JSON |
//! | `nstore sync` | Ingest the configured vault and flush |
//! | `nstore list` | List item keys, with key filters |
//! | `nstore get <key>` | Print one item's data as JSON |
//! | `nstore delete <key>` | Tombstone an item and flush |
//! | `nstore compact` | Load (compacting shards) and rewrite every log |
//!
//! Logs go to stderr. Set `RUST_LOG` (e.g. `RUST_LOG=notestore=debug`) to
//! see more than warnings.

use clap::{Parser, Subcommand};
use notestore::commands;
use notestore::config::{self, Config};
use notestore_core::filter::FilterOpts;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// notestore: Markdown blocks, merge-updated items, crash-tolerant logs.
#[derive(Parser)]
#[command(
    name = "nstore",
    about = "notestore: Markdown block chunking and a log-structured item store",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nstore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the store directory. Safe to run repeatedly.
    Init,

    /// Parse a Markdown file and print its blocks.
    ///
    /// Uses the `[chunking]` section of the config when the config file
    /// exists, defaults otherwise.
    Chunks {
        /// Markdown file to parse.
        file: PathBuf,
    },

    /// Ingest the `[connectors.filesystem]` vault.
    Sync,

    /// List item keys in a collection.
    List {
        /// Collection to list (`sources` or `blocks`).
        #[arg(long, default_value = "blocks")]
        collection: String,

        #[arg(long)]
        key_starts_with: Option<String>,

        #[arg(long)]
        key_ends_with: Option<String>,

        #[arg(long)]
        key_includes: Option<String>,

        #[arg(long)]
        exclude_key_starts_with: Option<String>,

        /// Maximum number of keys to print.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print one item's data.
    Get {
        key: String,

        #[arg(long, default_value = "blocks")]
        collection: String,
    },

    /// Delete an item and write its tombstone.
    Delete {
        key: String,

        #[arg(long, default_value = "blocks")]
        collection: String,
    },

    /// Compact every log.
    Compact,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Chunks { file } = &cli.command {
        let cfg = config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal("."));
        return commands::run_chunks(file, &cfg.chunking);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg)?,
        Commands::Chunks { .. } => unreachable!(),
        Commands::Sync => commands::run_sync(&cfg).await?,
        Commands::List {
            collection,
            key_starts_with,
            key_ends_with,
            key_includes,
            exclude_key_starts_with,
            limit,
        } => {
            let filter = FilterOpts {
                key_starts_with,
                key_ends_with,
                key_includes,
                exclude_key_starts_with,
                limit,
                ..FilterOpts::default()
            };
            commands::run_list(&cfg, &collection, &filter).await?;
        }
        Commands::Get { key, collection } => commands::run_get(&cfg, &collection, &key).await?,
        Commands::Delete { key, collection } => {
            commands::run_delete(&cfg, &collection, &key).await?
        }
        Commands::Compact => commands::run_compact(&cfg).await?,
    }

    Ok(())
}
