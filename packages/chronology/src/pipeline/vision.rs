//! Vision extraction: batched page images through the LLM's vision call.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::pipeline::extract::EntryGenerator;
use crate::pipeline::prompts::format_vision_prompt;
use crate::traits::extractor::{Extractor, ExtractorKind};
use crate::types::citation::Citation;
use crate::types::config::VisionConfig;
use crate::types::entry::Entry;
use crate::types::exhibit::{Exhibit, ExhibitContext};

/// Confidence of a batch citation. Image page numbers are known exactly.
pub const BATCH_CITATION_CONFIDENCE: f32 = 0.95;

/// Extracts entries from page images in fixed-size batches.
pub struct VisionExtractor {
    generator: EntryGenerator,
    config: VisionConfig,
}

impl VisionExtractor {
    pub fn new(generator: EntryGenerator, config: VisionConfig) -> Self {
        Self { generator, config }
    }

    /// Extract entries from `images`, where `page_nums[i]` is the absolute
    /// page of `images[i]`.
    ///
    /// Every entry from a batch shares one citation spanning the batch's
    /// first and last page. A provider failure stops extraction and returns
    /// the entries gathered so far.
    pub async fn extract_images(
        &self,
        images: &[Vec<u8>],
        exhibit_id: &str,
        page_nums: &[u32],
        ctx: &ExhibitContext,
    ) -> Result<Vec<Entry>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = self.config.batch_size.max(1);
        let batches = images.len().div_ceil(batch_size);
        info!(exhibit_id, images = images.len(), batches, "Starting vision extraction");

        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for (batch_index, batch) in images.chunks(batch_size).enumerate() {
            let offset = batch_index * batch_size;
            let pages: Vec<u32> = (offset..offset + batch.len())
                .map(|i| page_nums.get(i).copied().unwrap_or(i as u32 + 1))
                .collect();

            let prompt = format_vision_prompt(self.generator.registry(), exhibit_id, &pages);
            let batch_entries = match self.generator.from_images(prompt, batch, exhibit_id).await {
                Ok(batch_entries) => batch_entries,
                Err(e) => {
                    warn!(
                        exhibit_id,
                        batch = batch_index,
                        error = %e,
                        "Vision batch failed; returning earlier batches"
                    );
                    break;
                }
            };

            let citation = batch_citation(&pages, ctx);
            let before = entries.len();
            for mut entry in batch_entries {
                if !seen.insert(entry.dedup_key()) {
                    continue;
                }
                if let Some(citation) = &citation {
                    entry.citation_confidence = Some(citation.confidence);
                    entry.citation = Some(citation.clone());
                }
                entries.push(entry);
            }

            debug!(
                exhibit_id,
                batch = batch_index,
                entries = entries.len() - before,
                "Vision batch extracted"
            );
        }

        Ok(entries)
    }
}

/// Citation covering a batch's first through last page.
fn batch_citation(pages: &[u32], ctx: &ExhibitContext) -> Option<Citation> {
    let first = *pages.first()?;
    let last = *pages.last()?;

    let mut citation = Citation::new(first).with_confidence(BATCH_CITATION_CONFIDENCE);
    if let Some(rel) = ctx.relative_page(first) {
        citation = citation.with_exhibit(ctx.exhibit_id.clone(), rel);
        if let Some(total) = ctx.total_pages() {
            citation = citation.with_total_pages(total);
        }
    }
    if last != first {
        citation = citation.with_end(ctx.relative_page(last), last);
    }
    Some(citation)
}

#[async_trait]
impl Extractor for VisionExtractor {
    async fn extract(&self, exhibit: &Exhibit) -> Result<Vec<Entry>> {
        if !exhibit.has_images() {
            return Ok(Vec::new());
        }
        let page_nums = exhibit.image_page_numbers();
        self.extract_images(
            &exhibit.images,
            &exhibit.exhibit_id,
            &page_nums,
            &exhibit.context(),
        )
        .await
    }

    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Vision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::pipeline::retry::RetryPolicy;
    use crate::testing::{CallKind, MockLlm};
    use crate::types::config::RetryConfig;
    use crate::types::schema::SchemaRegistry;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn extractor(mock: &MockLlm, batch_size: usize) -> VisionExtractor {
        VisionExtractor::new(
            EntryGenerator::new(
                Arc::new(mock.clone()),
                Arc::new(SchemaRegistry::builtin()),
                Default::default(),
                RetryPolicy::new(RetryConfig::disabled()),
            ),
            VisionConfig { batch_size },
        )
    }

    fn images(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i as u8]).collect()
    }

    #[tokio::test]
    async fn test_batches_share_citation() {
        let mock = MockLlm::new()
            .then_respond(r#"[{"date": "2024-01-01"}, {"date": "2024-01-02"}]"#)
            .then_respond(r#"[{"date": "2024-01-03"}]"#);
        let exhibit = Exhibit::new("7F", "")
            .with_images(images(3))
            .with_page_range(40, 42);

        let entries = extractor(&mock, 2).extract(&exhibit).await.unwrap();
        assert_eq!(entries.len(), 3);

        let first = entries[0].citation.as_ref().unwrap();
        assert_eq!(first.format(), "7F@1-2 (pp.40-41)");
        assert!(!first.is_estimated);
        assert_eq!(first.confidence, 0.95);
        assert_eq!(entries[1].citation, entries[0].citation);
        assert_eq!(entries[2].citation.as_ref().unwrap().format(), "7F@3 (p.42)");

        let calls = mock.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.kind == CallKind::Vision));
        assert_eq!(calls[0].image_count, 2);
        assert_eq!(calls[1].image_count, 1);
    }

    #[tokio::test]
    async fn test_no_images_no_call() {
        let mock = MockLlm::new();
        let entries = extractor(&mock, 10)
            .extract(&Exhibit::new("1F", "text only"))
            .await
            .unwrap();
        assert!(entries.is_empty());
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_later_batch_failure_returns_partial() {
        let mock = MockLlm::new()
            .then_respond(r#"[{"date": "2024-01-01"}]"#)
            .then_error(LlmError::invalid_request("image too large"));
        let exhibit = Exhibit::new("8F", "").with_images(images(4));

        let entries = extractor(&mock, 2).extract(&exhibit).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].citation.as_ref().unwrap().format(), "pp.1-2");
    }

    #[tokio::test]
    async fn test_first_batch_failure_returns_empty() {
        let mock = MockLlm::new().then_error(LlmError::invalid_request("bad image"));
        let exhibit = Exhibit::new("9F", "").with_images(images(1));
        let entries = assert_ok!(extractor(&mock, 2).extract(&exhibit).await);
        assert!(entries.is_empty());
        assert_eq!(mock.calls().len(), 1);
    }
}
