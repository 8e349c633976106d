//! Splitting oversized exhibit text at semantic boundaries.
//!
//! Chunks overlap slightly so an event straddling a cut still reaches the
//! model whole in at least one chunk. The overlap only exists for LLM
//! context; merged results are deduplicated.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::config::ChunkerConfig;
use crate::types::entry::Entry;

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t]*\n+").unwrap());
static CAPS_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[A-Z][A-Z0-9 ,.:/&()#-]{3,}[ \t]*$").unwrap());
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]["')\]]?\s"#).unwrap());

/// One slice of an exhibit's text.
///
/// `start_char`/`end_char` are byte offsets into the original text, always
/// on UTF-8 char boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub is_continuation: bool,
}

impl TextChunk {
    /// Identifier used in prompts and logs, e.g. `3F_chunk2`.
    pub fn label(&self, exhibit_id: &str) -> String {
        if self.total_chunks <= 1 {
            exhibit_id.to_string()
        } else {
            format!("{}_chunk{}", exhibit_id, self.chunk_index + 1)
        }
    }
}

/// Splits text into overlapping chunks.
#[derive(Debug, Clone, Default)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn needs_chunking(&self, text: &str) -> bool {
        text.len() > self.config.max_chars
    }

    /// Split `text`. Input under the threshold (including empty input)
    /// comes back as a single chunk.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if !self.needs_chunking(text) || self.config.max_chars == 0 {
            return vec![TextChunk {
                text: text.to_string(),
                chunk_index: 0,
                total_chunks: 1,
                start_char: 0,
                end_char: text.len(),
                is_continuation: false,
            }];
        }

        let mut spans = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let target = floor_boundary(text, start + self.config.max_chars);
            let end = if target >= text.len() {
                text.len()
            } else {
                self.find_boundary(text, start, target)
            };
            spans.push((start, end));

            if end >= text.len() {
                break;
            }

            let overlapped = end.saturating_sub(self.config.overlap);
            let min_progress = start + self.config.min_chunk;
            let mut next = floor_boundary(text, overlapped.max(min_progress).min(end));
            if next <= start {
                next = end;
            }
            start = next;
        }

        let total = spans.len();
        spans
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| TextChunk {
                text: text[start..end].to_string(),
                chunk_index: i,
                total_chunks: total,
                start_char: start,
                end_char: end,
                is_continuation: i > 0,
            })
            .collect()
    }

    /// Pick a cut point at or before `target`, preferring stronger
    /// boundaries within the search window.
    fn find_boundary(&self, text: &str, start: usize, target: usize) -> usize {
        let window_start = ceil_boundary(
            text,
            target.saturating_sub(self.config.search_window).max(start + 1),
        );
        if window_start >= target {
            return target;
        }
        let window = &text[window_start..target];

        let candidates = [
            PARAGRAPH_BREAK.find_iter(window).last().map(|m| m.end()),
            CAPS_HEADER
                .find_iter(window)
                .filter(|m| m.start() > 0)
                .last()
                .map(|m| m.start()),
            SENTENCE_END.find_iter(window).last().map(|m| m.end()),
            window.rfind('\n').map(|i| i + 1),
            window
                .char_indices()
                .filter(|(_, c)| c.is_whitespace())
                .last()
                .map(|(i, c)| i + c.len_utf8()),
        ];

        candidates
            .into_iter()
            .flatten()
            .map(|offset| window_start + offset)
            .find(|&cut| cut > start)
            .unwrap_or(target)
    }

    /// Merge per-chunk entries, dropping duplicates by dedup key.
    ///
    /// First occurrence wins. Entries from continuation chunks are tagged
    /// with their chunk index.
    pub fn merge(&self, chunk_results: Vec<Vec<Entry>>, chunks: &[TextChunk]) -> Vec<Entry> {
        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        for (i, entries) in chunk_results.into_iter().enumerate() {
            let continuation = chunks.get(i).is_some_and(|c| c.is_continuation);
            for mut entry in entries {
                if !seen.insert(entry.dedup_key()) {
                    continue;
                }
                if continuation {
                    entry.source_chunk = Some(i);
                }
                merged.push(entry);
            }
        }

        merged
    }
}

fn floor_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}
