//! Text extraction: chunked prompts over an exhibit's searchable text.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::citations::matcher::{CitationMatcher, MatchMethod};
use crate::error::Result;
use crate::pipeline::chunk_retry::ChunkMergeRetryHandler;
use crate::pipeline::chunker::TextChunker;
use crate::pipeline::extract::EntryGenerator;
use crate::pipeline::prompts::format_text_prompt;
use crate::traits::extractor::{Extractor, ExtractorKind};
use crate::types::entry::Entry;
use crate::types::exhibit::{Exhibit, ExhibitContext, PageText};

/// Extracts entries from exhibit text.
pub struct TextExtractor {
    generator: EntryGenerator,
    chunker: TextChunker,
    matcher: CitationMatcher,
    chunk_retry: bool,
}

impl TextExtractor {
    pub fn new(generator: EntryGenerator, chunker: TextChunker, matcher: CitationMatcher) -> Self {
        Self {
            generator,
            chunker,
            matcher,
            chunk_retry: true,
        }
    }

    /// Enable or disable the merged-chunk retry for sparse entries.
    pub fn with_chunk_retry(mut self, enabled: bool) -> Self {
        self.chunk_retry = enabled;
        self
    }

    /// Extract entries from `text`.
    ///
    /// With `pages`, each entry is matched against the page texts and gets a
    /// citation. A provider failure stops extraction and returns what was
    /// already parsed, which is empty when the first chunk fails.
    pub async fn extract_text(
        &self,
        text: &str,
        exhibit_id: &str,
        pages: Option<&[PageText]>,
        ctx: Option<&ExhibitContext>,
    ) -> Result<Vec<Entry>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.chunker.chunk(text);
        let total = chunks.len();
        if total > 1 {
            info!(exhibit_id, chunks = total, chars = text.len(), "Chunking exhibit text");
        }

        let mut chunk_results = Vec::with_capacity(total);
        for chunk in &chunks {
            let part = (total > 1).then_some((chunk.chunk_index, total));
            let prompt =
                format_text_prompt(self.generator.registry(), &chunk.label(exhibit_id), &chunk.text, part);

            let entries = match self.generator.from_text(prompt, exhibit_id).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        exhibit_id,
                        chunk_index = chunk.chunk_index,
                        kept_chunks = chunk_results.len(),
                        error = %e,
                        "Text extraction failed; keeping earlier chunks"
                    );
                    break;
                }
            };

            let entries = if self.chunk_retry && total > 1 {
                let handler = ChunkMergeRetryHandler::new(self.generator.clone());
                let next = chunks.get(chunk.chunk_index + 1);
                handler.retry(entries, chunk, next, exhibit_id).await
            } else {
                entries
            };

            debug!(
                exhibit_id,
                chunk_index = chunk.chunk_index,
                entries = entries.len(),
                "Chunk extracted"
            );
            chunk_results.push(entries);
        }

        let mut entries = self.chunker.merge(chunk_results, &chunks);

        if let Some(pages) = pages.filter(|p| !p.is_empty()) {
            let default_ctx;
            let ctx = match ctx {
                Some(ctx) => ctx,
                None => {
                    default_ctx = ExhibitContext::new(exhibit_id);
                    &default_ctx
                }
            };
            self.attach_citations(&mut entries, pages, ctx);
        }

        Ok(entries)
    }

    fn attach_citations(&self, entries: &mut [Entry], pages: &[PageText], ctx: &ExhibitContext) {
        let mut matched = 0;
        for entry in entries.iter_mut() {
            let result = self.matcher.match_entry(entry, pages, ctx);
            if result.method == MatchMethod::SearchMatch {
                matched += 1;
            }
            entry.citation_confidence = result.citation.as_ref().map(|c| c.confidence);
            entry.citation = result.citation;
        }
        debug!(
            exhibit_id = %ctx.exhibit_id,
            matched,
            fallback = entries.len() - matched,
            "Attached search citations"
        );
    }
}

#[async_trait]
impl Extractor for TextExtractor {
    async fn extract(&self, exhibit: &Exhibit) -> Result<Vec<Entry>> {
        let ctx = exhibit.context();
        let pages = (!exhibit.pages.is_empty()).then_some(exhibit.pages.as_slice());
        self.extract_text(&exhibit.text, &exhibit.exhibit_id, pages, Some(&ctx))
            .await
    }

    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Text
    }
}
