//! # notestore core
//!
//! Pure logic shared by the notestore engine: Markdown block parsing,
//! structural item keys, deep-merge rules, key filters, the `.ajson`
//! append-log codec, and the filesystem capability trait.
//!
//! This crate performs no native I/O of its own. Storage goes through the
//! [`fs::FileSystem`] trait, which hosts implement (the `notestore` crate
//! ships a tokio-backed one; [`fs::memory::MemoryFs`] is provided here for
//! tests and embedding).

pub mod chunk;
pub mod filter;
pub mod fs;
pub mod key;
pub mod merge;
pub mod models;
pub mod record;
