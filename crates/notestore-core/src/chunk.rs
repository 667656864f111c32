//! Markdown block parser.
//!
//! Splits a Markdown document into addressable [`Chunk`]s keyed by the
//! stack of headings that encloses them. Each block's text starts with a
//! breadcrumb line (`folder > note: H1 > H2:`) so the block stays
//! self-describing once it leaves the document.
//!
//! # Algorithm
//!
//! A single forward scan over the lines, tracking:
//!
//! 1. Front matter (`---` on line 0 up to the next bare `---`), emitted as
//!    one block with heading path `#`.
//! 2. A heading stack. A heading pops every entry at the same or a deeper
//!    level, pushes itself, and opens a new block at
//!    `file_path#H1#H2…`.
//! 3. An accumulator of content lines. Blank lines are skipped.
//!
//! A block ends when the next line is a heading, when the current or the
//! next line is longer than `min_length_for_single_line_blocks`, at list
//! transitions (nested item → top-level item, or item → top-level item →
//! nested item), and before a bare `---` rule.
//!
//! Repeated heading paths are disambiguated in document order:
//! `#A`, `#A{2}`, `#A{3}`, …
//!
//! # Example
//!
//! ```rust
//! use notestore_core::chunk::{parse_markdown, ChunkOptions};
//!
//! let opts = ChunkOptions { embed_input_min_chars: 1, ..Default::default() };
//! let parsed = parse_markdown("# A\nx\n# A\ny", "file.md", &opts).unwrap();
//! assert_eq!(parsed.blocks[0].path, "file.md#A");
//! assert_eq!(parsed.blocks[1].path, "file.md#A{2}");
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Chunk, ParsedBlocks};

/// Tuning knobs for [`parse_markdown`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkOptions {
    /// Blocks longer than this (in chars) are truncated.
    pub embed_input_max_chars: usize,
    /// Blocks whose body (text after the breadcrumb line) is shorter than
    /// this are dropped.
    pub embed_input_min_chars: usize,
    /// Let a block absorb deeper sub-headings instead of closing at each one.
    pub multi_heading_blocks: bool,
    /// A physical line longer than this always becomes its own block.
    pub min_length_for_single_line_blocks: usize,
    /// Drop blocks that carry a heading but no body.
    pub skip_blocks_with_headings_only: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            embed_input_max_chars: 8000,
            embed_input_min_chars: 50,
            multi_heading_blocks: false,
            min_length_for_single_line_blocks: 300,
            skip_blocks_with_headings_only: false,
        }
    }
}

impl ChunkOptions {
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.embed_input_max_chars == 0 {
            return Err(ChunkError::ZeroMaxChars);
        }
        if self.embed_input_min_chars > self.embed_input_max_chars {
            return Err(ChunkError::MinExceedsMax {
                min: self.embed_input_min_chars,
                max: self.embed_input_max_chars,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("embed_input_max_chars must be > 0")]
    ZeroMaxChars,
    #[error("embed_input_min_chars ({min}) exceeds embed_input_max_chars ({max})")]
    MinExceedsMax { min: usize, max: usize },
}

/// Parse `text` into blocks addressed under `file_path`.
///
/// Errors are logged and returned; no partial output is produced.
pub fn parse_markdown(
    text: &str,
    file_path: &str,
    opts: &ChunkOptions,
) -> Result<ParsedBlocks, ChunkError> {
    if let Err(e) = opts.validate() {
        tracing::error!(file_path, error = %e, "refusing to parse blocks");
        return Err(e);
    }

    let lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();

    let mut parser = BlockParser::new(file_path, opts);
    parser.run(&lines);

    Ok(ParsedBlocks {
        file_path: file_path.to_string(),
        blocks: parser.blocks,
    })
}

/// `notes/daily/today.md` → `notes > daily > today`.
pub fn file_path_to_breadcrumbs(file_path: &str) -> String {
    file_path
        .trim_end_matches(".md")
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" > ")
}

struct Heading {
    title: String,
    level: usize,
}

struct Pending {
    start: usize,
    text: String,
    heading: Option<String>,
    heading_path: String,
    /// Level of the heading that opened the block; 0 for headingless blocks.
    level: usize,
}

struct BlockParser<'a> {
    file_path: &'a str,
    opts: &'a ChunkOptions,
    breadcrumbs: String,
    headers: Vec<Heading>,
    pending: Option<Pending>,
    next_start: usize,
    used_paths: Vec<String>,
    blocks: Vec<Chunk>,
}

impl<'a> BlockParser<'a> {
    fn new(file_path: &'a str, opts: &'a ChunkOptions) -> Self {
        Self {
            file_path,
            opts,
            breadcrumbs: file_path_to_breadcrumbs(file_path),
            headers: Vec::new(),
            pending: None,
            next_start: 0,
            used_paths: Vec::new(),
            blocks: Vec::new(),
        }
    }

    fn run(&mut self, lines: &[&str]) {
        let mut i = 0;
        if let Some(end) = frontmatter_end(lines) {
            self.emit_frontmatter(&lines[1..end], end);
            self.next_start = end + 1;
            i = end + 1;
        }

        while i < lines.len() {
            let line = lines[i];
            let next = lines.get(i + 1).copied();
            let after_next = lines.get(i + 2).copied();

            if let Some((level, title)) = parse_heading(line) {
                if self.absorbs_heading(level) {
                    self.push_heading(level, title);
                    self.append(line);
                    if self.ends_block(line, next, after_next) {
                        self.flush(i);
                    }
                } else {
                    if i > 0 {
                        self.flush(i - 1);
                    }
                    self.push_heading(level, title);
                    self.open(i);
                }
            } else if line.trim().is_empty() {
                // blank lines never end a block on their own
            } else if is_rule(line) {
                if i > 0 {
                    self.flush(i - 1);
                }
                self.next_start = i + 1;
            } else {
                if self.pending.is_none() {
                    self.open(self.next_start);
                }
                self.append(line);
                if self.ends_block(line, next, after_next) {
                    self.flush(i);
                }
            }
            i += 1;
        }

        if !lines.is_empty() {
            self.flush(lines.len() - 1);
        }
    }

    /// Whether a heading at `level` continues the open block rather than
    /// closing it.
    fn absorbs_heading(&self, level: usize) -> bool {
        self.opts.multi_heading_blocks
            && self
                .pending
                .as_ref()
                .is_some_and(|p| p.level > 0 && level > p.level)
    }

    fn push_heading(&mut self, level: usize, title: &str) {
        self.headers.retain(|h| h.level < level);
        self.headers.push(Heading {
            title: title.to_string(),
            level,
        });
    }

    fn open(&mut self, start: usize) {
        let titles: Vec<&str> = self.headers.iter().map(|h| h.title.as_str()).collect();
        let text = if titles.is_empty() {
            format!("{}:", self.breadcrumbs)
        } else {
            format!("{}: {}:", self.breadcrumbs, titles.join(" > "))
        };
        self.pending = Some(Pending {
            start,
            text,
            heading: self.headers.last().map(|h| h.title.clone()),
            heading_path: format!("#{}", titles.join("#")),
            level: self.headers.last().map_or(0, |h| h.level),
        });
    }

    fn append(&mut self, line: &str) {
        if let Some(p) = self.pending.as_mut() {
            p.text.push('\n');
            p.text.push_str(line);
        }
    }

    fn ends_block(&self, line: &str, next: Option<&str>, after_next: Option<&str>) -> bool {
        let Some(next) = next else {
            return false;
        };
        if let Some((level, _)) = parse_heading(next) {
            if !self.absorbs_heading(level) {
                return true;
            }
        }
        let limit = self.opts.min_length_for_single_line_blocks;
        if line.chars().count() > limit || next.chars().count() > limit {
            return true;
        }
        if is_rule(next) {
            return true;
        }
        if is_nested_list_item(line) && is_top_list_item(next) {
            return true;
        }
        is_list_item(line) && is_top_list_item(next) && after_next.is_some_and(is_nested_list_item)
    }

    fn flush(&mut self, end: usize) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.next_start = end + 1;
        self.emit(
            pending.text.trim(),
            pending.heading,
            &pending.heading_path,
            [pending.start, end.max(pending.start)],
        );
    }

    fn emit_frontmatter(&mut self, content: &[&str], end: usize) {
        let body = content.join("\n");
        if body.trim().chars().count() < self.opts.embed_input_min_chars {
            tracing::debug!(
                file_path = self.file_path,
                "skipping front matter shorter than embed_input_min_chars"
            );
            return;
        }
        let text = format!("{}:\n{}", self.breadcrumbs, body.trim());
        self.emit(&text, None, "#", [0, end]);
    }

    fn emit(&mut self, text: &str, heading: Option<String>, heading_path: &str, lines: [usize; 2]) {
        let text = truncate_chars(text, self.opts.embed_input_max_chars);
        let body = text.split_once('\n').map_or("", |(_, b)| b.trim());

        if self.opts.skip_blocks_with_headings_only && body.is_empty() {
            tracing::debug!(file_path = self.file_path, heading_path, "skipping heading-only block");
            return;
        }
        if body.chars().count() < self.opts.embed_input_min_chars {
            tracing::debug!(
                file_path = self.file_path,
                heading_path,
                len = body.chars().count(),
                "skipping block shorter than embed_input_min_chars"
            );
            return;
        }

        let path = self.unique_heading_path(heading_path);
        self.blocks.push(Chunk {
            path: format!("{}{}", self.file_path, path),
            heading,
            length: text.chars().count(),
            lines,
            text: text.to_string(),
        });
    }

    fn unique_heading_path(&mut self, base: &str) -> String {
        let n = self.used_paths.iter().filter(|p| *p == base).count() + 1;
        self.used_paths.push(base.to_string());
        if n > 1 {
            format!("{}{{{}}}", base, n)
        } else {
            base.to_string()
        }
    }
}

/// Index of the closing `---` when line 0 opens front matter.
fn frontmatter_end(lines: &[&str]) -> Option<usize> {
    if !is_rule(lines.first()?) {
        return None;
    }
    lines
        .iter()
        .skip(1)
        .position(|l| is_rule(l))
        .map(|p| p + 1)
}

/// `## Title` → `(2, "Title")`.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &line[level..];
    if rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\t') {
        Some((level, rest.trim()))
    } else {
        None
    }
}

fn is_rule(line: &str) -> bool {
    line.trim_end() == "---"
}

fn is_list_item(line: &str) -> bool {
    let t = line.trim_start();
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") {
        return true;
    }
    let digits = t.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && (t[digits..].starts_with(". ") || t[digits..].starts_with(") "))
}

fn is_top_list_item(line: &str) -> bool {
    is_list_item(line) && !line.starts_with([' ', '\t'])
}

fn is_nested_list_item(line: &str) -> bool {
    is_list_item(line) && line.starts_with([' ', '\t'])
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
