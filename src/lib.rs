//! # notestore
//!
//! A local-first note store: Markdown documents are split into addressable
//! blocks, kept as merge-updated items in in-memory collections, and
//! persisted to crash-tolerant `.ajson` append logs.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Vault   │──▶│ BlockParser │──▶│  Collection  │──▶│  LogAdapter  │
//! │ (ingest) │   │  (core)     │   │ items+queue  │   │ single/shard │
//! └──────────┘   └─────────────┘   └──────┬───────┘   └──────┬───────┘
//!                                         │ debounce         │
//!                                  ┌──────▼───────┐   ┌──────▼───────┐
//!                                  │SaveScheduler │   │  FileSystem  │
//!                                  └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! nstore init                          # create the store directory
//! nstore chunks notes/today.md         # print a file's blocks as JSON
//! nstore sync                          # ingest [connectors.filesystem]
//! nstore list --key-starts-with notes/ # list block keys
//! nstore compact                       # compact and rewrite every log
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`item`] | Items, item kinds, weak item references |
//! | [`collection`] | In-memory collections and the save queue |
//! | [`scheduler`] | Debounced saves and the in-flight flag |
//! | [`log`] | Single-file and sharded log adapters |
//! | [`store`] | Store handle and collection registry |
//! | [`native_fs`] | Native filesystem capability |
//! | [`adapters`] | Content adapters by file extension |
//! | [`ingest`] | Vault scanning and reconciliation |
//! | [`commands`] | CLI command implementations |

pub mod adapters;
pub mod collection;
pub mod commands;
pub mod config;
pub mod ingest;
pub mod item;
pub mod log;
pub mod native_fs;
pub mod scheduler;
pub mod store;
