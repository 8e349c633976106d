//! Bounded fan-out over exhibits.
//!
//! Each exhibit runs its text and vision routes concurrently, then vision
//! recovery for sparse entries. At most `max_concurrent` exhibits are in
//! flight; a failing or panicking exhibit never takes the others down.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::citations::matcher::CitationMatcher;
use crate::error::{ChronologyError, Result};
use crate::pipeline::chunker::TextChunker;
use crate::pipeline::extract::EntryGenerator;
use crate::pipeline::recovery::RecoveryHandler;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::text::TextExtractor;
use crate::pipeline::vision::VisionExtractor;
use crate::traits::extractor::Extractor;
use crate::traits::llm::LlmClient;
use crate::types::config::{EngineConfig, ParallelConfig};
use crate::types::exhibit::Exhibit;
use crate::types::result::{ExhibitExtractionResult, ParallelExtractionResult};
use crate::types::schema::SchemaRegistry;

/// Runs text, vision and recovery for many exhibits at once.
pub struct ParallelExtractor {
    text: Arc<dyn Extractor>,
    vision: Arc<dyn Extractor>,
    recovery: Option<RecoveryHandler>,
    config: ParallelConfig,
}

impl ParallelExtractor {
    pub fn new(text: Arc<dyn Extractor>, vision: Arc<dyn Extractor>, config: ParallelConfig) -> Self {
        Self {
            text,
            vision,
            recovery: None,
            config,
        }
    }

    /// Enable vision recovery of sparse entries.
    pub fn with_recovery(mut self, recovery: RecoveryHandler) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Wire the LLM-backed text and vision extractors from one client.
    pub fn from_llm(
        llm: Arc<dyn LlmClient>,
        registry: Arc<SchemaRegistry>,
        config: &EngineConfig,
    ) -> Self {
        let generator = EntryGenerator::new(
            llm,
            registry.clone(),
            config.model.clone(),
            RetryPolicy::new(config.retry.clone()),
        );

        let text = TextExtractor::new(
            generator.clone(),
            TextChunker::new(config.chunker.clone()),
            CitationMatcher::new(config.matcher.clone()),
        );
        let vision: Arc<dyn Extractor> =
            Arc::new(VisionExtractor::new(generator, config.vision.clone()));

        Self::new(Arc::new(text), vision.clone(), config.parallel.clone())
            .with_recovery(RecoveryHandler::new(vision, registry))
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    /// Extract every exhibit, returning results in input order.
    pub async fn extract_exhibits(&self, exhibits: &[Exhibit]) -> ParallelExtractionResult {
        let started = Instant::now();
        let max_concurrent = self.config.max_concurrent.max(1);
        let semaphore = Semaphore::new(max_concurrent);

        info!(
            exhibits = exhibits.len(),
            max_concurrent,
            format = ?self.config.format,
            "Starting parallel extraction"
        );

        let tasks = exhibits.iter().map(|exhibit| {
            let semaphore = &semaphore;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return ExhibitExtractionResult::failure(
                        exhibit.exhibit_id.clone(),
                        "extraction cancelled",
                    );
                };
                self.run_exhibit(exhibit).await
            }
        });
        let results = join_all(tasks).await;

        let aggregate = ParallelExtractionResult::from_results(
            results,
            started.elapsed().as_millis() as u64,
        );
        info!(
            successful = aggregate.successful_exhibits,
            failed = aggregate.failed_exhibits,
            entries = aggregate.entries.len(),
            elapsed_ms = aggregate.processing_time_ms,
            "Parallel extraction complete"
        );
        aggregate
    }

    /// One exhibit, with errors and panics turned into a failure result.
    async fn run_exhibit(&self, exhibit: &Exhibit) -> ExhibitExtractionResult {
        let started = Instant::now();
        let exhibit_id = exhibit.exhibit_id.as_str();

        let outcome = AssertUnwindSafe(self.extract_one(exhibit))
            .catch_unwind()
            .await;

        let mut result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!(exhibit_id, error = %e, "Exhibit extraction failed");
                ExhibitExtractionResult::failure(exhibit_id, e.to_string())
            }
            Err(payload) => {
                let e = ChronologyError::Panicked(panic_message(payload.as_ref()));
                error!(exhibit_id, error = %e, "Exhibit extraction panicked");
                ExhibitExtractionResult::failure(exhibit_id, e.to_string())
            }
        };
        result.processing_time_ms = started.elapsed().as_millis() as u64;

        debug!(
            exhibit_id,
            entries = result.entries.len(),
            elapsed_ms = result.processing_time_ms,
            success = result.is_success(),
            "Exhibit done"
        );
        result
    }

    async fn extract_one(&self, exhibit: &Exhibit) -> Result<ExhibitExtractionResult> {
        let format = self.config.format;
        let run_text = format.uses_text() && exhibit.has_text();
        let run_vision = format.uses_vision() && exhibit.has_images();

        let text_route = async {
            if run_text {
                Some(self.text.extract(exhibit).await)
            } else {
                None
            }
        };
        let vision_route = async {
            if run_vision {
                Some(self.vision.extract(exhibit).await)
            } else {
                None
            }
        };
        let (text, vision) = futures::join!(text_route, vision_route);

        let routes = usize::from(run_text) + usize::from(run_vision);
        let mut errors = Vec::new();
        let text_entries = settle(text, &mut errors);
        let vision_entries = settle(vision, &mut errors);

        // The exhibit fails only when every route that ran failed
        if routes > 0 && errors.len() == routes {
            return Err(errors.remove(0));
        }
        for e in &errors {
            warn!(
                exhibit_id = %exhibit.exhibit_id,
                error = %e,
                "One extraction route failed; keeping the other"
            );
        }

        let text_count = text_entries.len();
        let vision_count = vision_entries.len();
        let mut entries = text_entries;
        entries.extend(vision_entries);

        let mut recovered = 0;
        if let Some(recovery) = self.recovery.as_ref() {
            if format.uses_recovery() && exhibit.has_images() {
                let outcome = recovery.recover(entries, exhibit).await;
                recovered = outcome.filled + outcome.added;
                entries = outcome.entries;
            }
        }

        let mut result = ExhibitExtractionResult::success(exhibit.exhibit_id.clone(), entries);
        result.text_entries = text_count;
        result.vision_entries = vision_count;
        result.recovered_entries = recovered;
        Ok(result)
    }
}

fn settle<T>(
    route: Option<Result<Vec<T>>>,
    errors: &mut Vec<ChronologyError>,
) -> Vec<T> {
    match route {
        Some(Ok(entries)) => entries,
        Some(Err(e)) => {
            errors.push(e);
            Vec::new()
        }
        None => Vec::new(),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
