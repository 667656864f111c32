//! Content adapters: which parser turns a file into blocks.
//!
//! Adapters are a closed set of variants looked up by file extension in an
//! [`AdapterRegistry`]. The registry is built once, before ingestion, so a
//! file's adapter is a map lookup rather than a property probe.

use std::collections::BTreeMap;

use notestore_core::chunk::{parse_markdown, ChunkError, ChunkOptions};
use notestore_core::models::ParsedBlocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAdapter {
    Markdown,
}

impl BlockAdapter {
    pub fn parse(
        self,
        text: &str,
        file_path: &str,
        opts: &ChunkOptions,
    ) -> Result<ParsedBlocks, ChunkError> {
        match self {
            BlockAdapter::Markdown => parse_markdown(text, file_path, opts),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    by_extension: BTreeMap<String, BlockAdapter>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            by_extension: BTreeMap::new(),
        };
        registry.register("md", BlockAdapter::Markdown);
        registry.register("markdown", BlockAdapter::Markdown);
        registry
    }
}

impl AdapterRegistry {
    pub fn register(&mut self, extension: &str, adapter: BlockAdapter) {
        self.by_extension
            .insert(extension.to_ascii_lowercase(), adapter);
    }

    /// Adapter for `path`'s extension (case-insensitive).
    pub fn resolve(&self, path: &str) -> Option<BlockAdapter> {
        let name = notestore_core::fs::file_name(path);
        let (_, extension) = name.rsplit_once('.')?;
        self.by_extension
            .get(&extension.to_ascii_lowercase())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_by_extension() {
        let registry = AdapterRegistry::default();
        assert_eq!(registry.resolve("notes/a.md"), Some(BlockAdapter::Markdown));
        assert_eq!(registry.resolve("A.MARKDOWN"), Some(BlockAdapter::Markdown));
        assert_eq!(registry.resolve("notes/a.txt"), None);
        assert_eq!(registry.resolve("notes.d/README"), None);
    }

    #[test]
    fn test_registered_extension() {
        let mut registry = AdapterRegistry::default();
        registry.register("MDX", BlockAdapter::Markdown);
        assert_eq!(registry.resolve("page.mdx"), Some(BlockAdapter::Markdown));
    }

    #[test]
    fn test_markdown_parse() {
        let opts = ChunkOptions {
            embed_input_min_chars: 1,
            ..Default::default()
        };
        let parsed = BlockAdapter::Markdown
            .parse("# Title\nbody", "a.md", &opts)
            .unwrap();
        assert_eq!(parsed.blocks.len(), 1);
        assert_eq!(parsed.blocks[0].path, "a.md#Title");
    }
}
