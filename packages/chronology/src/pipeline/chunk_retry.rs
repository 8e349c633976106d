//! Retry for sparse entries cut off at a chunk boundary.
//!
//! When a visit starts near the end of one chunk, the model often sees the
//! date and provider but not the content. Re-extracting from the current
//! chunk joined to the next one usually recovers it.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::pipeline::chunker::TextChunk;
use crate::pipeline::extract::EntryGenerator;
use crate::pipeline::prompts::format_merged_retry_prompt;
use crate::types::entry::{EnrichmentSource, Entry};

/// Marker placed between merged chunks.
pub const CONTINUATION_MARKER: &str = "--- CONTINUATION ---";

/// Characters of raw text kept as a review hint.
pub const DEFAULT_PREVIEW_CHARS: usize = 300;

/// Single-shot merged-chunk retry.
///
/// Each instance retries at most once; later calls only attach review
/// hints. This keeps a retry from cascading into further merges.
pub struct ChunkMergeRetryHandler {
    generator: EntryGenerator,
    preview_chars: usize,
    attempted: AtomicBool,
}

impl ChunkMergeRetryHandler {
    pub fn new(generator: EntryGenerator) -> Self {
        Self {
            generator,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            attempted: AtomicBool::new(false),
        }
    }

    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    pub fn has_attempted(&self) -> bool {
        self.attempted.load(Ordering::SeqCst)
    }

    /// Fill sparse entries from `current` merged with `next`.
    ///
    /// Entries that stay sparse get a `review_hint` preview of the raw text.
    pub async fn retry(
        &self,
        mut entries: Vec<Entry>,
        current: &TextChunk,
        next: Option<&TextChunk>,
        exhibit_id: &str,
    ) -> Vec<Entry> {
        let registry = self.generator.registry();
        let sparse: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| registry.is_sparse(e))
            .map(|(i, _)| i)
            .collect();

        if sparse.is_empty() {
            return entries;
        }

        if self.attempted.swap(true, Ordering::SeqCst) {
            debug!(exhibit_id, "Merged-chunk retry already used");
            self.attach_hints(&mut entries, &sparse, &current.text);
            return entries;
        }

        let Some(next) = next else {
            self.attach_hints(&mut entries, &sparse, &current.text);
            return entries;
        };

        let merged = merge_chunks(current, next);
        let prompt = format_merged_retry_prompt(registry, exhibit_id, &merged);

        let candidates = match self.generator.from_text(prompt, exhibit_id).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(
                    exhibit_id,
                    chunk_index = current.chunk_index,
                    error = %e,
                    "Merged-chunk retry failed"
                );
                self.attach_hints(&mut entries, &sparse, &current.text);
                return entries;
            }
        };

        let mut used = vec![false; candidates.len()];
        let mut filled = 0;
        let mut unfilled = Vec::new();

        for &i in &sparse {
            let entry = &mut entries[i];
            let found = candidates.iter().enumerate().position(|(j, c)| {
                !used[j]
                    && c.date == entry.date
                    && c.visit_type == entry.visit_type
                    && !registry.is_sparse(c)
            });

            match found {
                Some(j) => {
                    used[j] = true;
                    entry.occurrence_treatment = candidates[j].occurrence_treatment.clone();
                    entry.enriched_via = Some(EnrichmentSource::ChunkMerge);
                    filled += 1;
                }
                None => unfilled.push(i),
            }
        }

        self.attach_hints(&mut entries, &unfilled, &current.text);

        info!(
            exhibit_id,
            chunk_index = current.chunk_index,
            sparse = sparse.len(),
            filled,
            "Merged-chunk retry complete"
        );
        entries
    }

    fn attach_hints(&self, entries: &mut [Entry], indices: &[usize], text: &str) {
        for &i in indices {
            let entry = &mut entries[i];
            entry.review_hint = Some(preview_near(text, &entry.date, self.preview_chars));
        }
    }
}

/// Current chunk, the marker, then the part of `next` not already covered
/// by the overlap.
pub fn merge_chunks(current: &TextChunk, next: &TextChunk) -> String {
    let tail = if next.start_char <= current.end_char && current.end_char <= next.end_char {
        &next.text[current.end_char - next.start_char..]
    } else {
        next.text.as_str()
    };
    format!("{}\n\n{}\n\n{}", current.text, CONTINUATION_MARKER, tail)
}

/// Up to `max_chars` of `text` starting at the first mention of `date`,
/// or from the start when the date isn't found.
fn preview_near(text: &str, date: &str, max_chars: usize) -> String {
    let start = if date.is_empty() {
        0
    } else {
        text.find(date).unwrap_or(0)
    };
    let slice = &text[start..];
    let preview: String = slice.chars().take(max_chars).collect();
    if preview.len() < slice.len() {
        format!("{}...", preview.trim_end())
    } else {
        preview.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::retry::RetryPolicy;
    use crate::testing::MockLlm;
    use crate::types::entry::VisitType;
    use crate::types::schema::SchemaRegistry;
    use std::sync::Arc;

    fn chunk(index: usize, start: usize, text: &str) -> TextChunk {
        TextChunk {
            text: text.to_string(),
            chunk_index: index,
            total_chunks: 2,
            start_char: start,
            end_char: start + text.len(),
            is_continuation: index > 0,
        }
    }

    fn handler(mock: &MockLlm) -> ChunkMergeRetryHandler {
        ChunkMergeRetryHandler::new(EntryGenerator::new(
            Arc::new(mock.clone()),
            Arc::new(SchemaRegistry::builtin()),
            Default::default(),
            RetryPolicy::default(),
        ))
    }

    fn sparse_entry() -> Entry {
        Entry::new("2024-03-02", "5F")
            .with_provider("Dr. Patel")
            .with_visit_type(VisitType::Emergency)
    }

    #[test]
    fn test_merge_skips_overlap() {
        let text = "aaaa bbbb cccc dddd";
        let current = chunk(0, 0, &text[..10]);
        let next = chunk(1, 5, &text[5..]);
        assert_eq!(
            merge_chunks(&current, &next),
            "aaaa bbbb \n\n--- CONTINUATION ---\n\ncccc dddd"
        );
    }

    #[tokio::test]
    async fn test_fills_sparse_entry_once() {
        let mock = MockLlm::new().with_default_response(
            r#"[{"date": "2024-03-02", "visit_type": "emergency", "provider": "Dr. Patel",
                 "occurrence_treatment": {"chief_complaint": "Fall from ladder with wrist pain"}}]"#,
        );
        let handler = handler(&mock);
        let current = chunk(0, 0, "ED visit 2024-03-02 Dr. Patel");
        let next = chunk(1, 29, "chief complaint: fall from ladder");

        let entries = handler
            .retry(vec![sparse_entry()], &current, Some(&next), "5F")
            .await;

        assert_eq!(entries[0].enriched_via, Some(EnrichmentSource::ChunkMerge));
        assert!(entries[0].review_hint.is_none());
        assert!(mock.calls()[0].prompt.contains(CONTINUATION_MARKER));

        // Second use of the same handler only attaches hints
        let again = handler
            .retry(vec![sparse_entry()], &current, Some(&next), "5F")
            .await;
        assert_eq!(mock.calls().len(), 1);
        assert!(again[0].review_hint.as_deref().unwrap().starts_with("2024-03-02"));
    }

    #[tokio::test]
    async fn test_no_sparse_entries_no_call() {
        let mock = MockLlm::new().with_default_response("[]");
        let handler = handler(&mock);
        let rich = sparse_entry().with_field("chief_complaint", "Syncope while walking the dog");
        let current = chunk(0, 0, "text");

        let entries = handler.retry(vec![rich], &current, None, "5F").await;
        assert!(entries[0].review_hint.is_none());
        assert!(mock.calls().is_empty());
        assert!(!handler.has_attempted());
    }

    #[tokio::test]
    async fn test_unfillable_entry_gets_preview() {
        let mock = MockLlm::new().with_default_response("[]");
        let handler = handler(&mock).with_preview_chars(8);
        let current = chunk(0, 0, "Seen 2024-03-02 in the ED for something");
        let next = chunk(1, 39, " more");

        let entries = handler
            .retry(vec![sparse_entry()], &current, Some(&next), "5F")
            .await;
        assert_eq!(entries[0].review_hint.as_deref(), Some("2024-03-..."));
        assert!(entries[0].enriched_via.is_none());
    }
}
