//! Data types produced by the block parser.

use serde::{Deserialize, Serialize};

/// An addressable region of a Markdown document.
///
/// `path` is `<file_path>#<heading_path>`; `lines` is the inclusive,
/// zero-based line range the block was read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub path: String,
    pub heading: Option<String>,
    pub text: String,
    pub length: usize,
    pub lines: [usize; 2],
}

/// Parser output handed to the consumer that turns blocks into items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedBlocks {
    pub file_path: String,
    pub blocks: Vec<Chunk>,
}

impl ParsedBlocks {
    pub fn keys(&self) -> Vec<String> {
        self.blocks.iter().map(|b| b.path.clone()).collect()
    }
}
