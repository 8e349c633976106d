//! Top-level chronology run.
//!
//! Normalizes the exhibit input, fans out extraction, reconciles citations
//! against the page-range resolver and optionally sorts by date. Every
//! failure mode, including a timeout or panic, ends in a [`ChronologyResult`].

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, LazyLock};
use std::time::Instant;

use futures::FutureExt;
use regex::Regex;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::citations::resolver::CitationResolver;
use crate::error::ChronologyError;
use crate::pipeline::parallel::{panic_message, ParallelExtractor};
use crate::traits::llm::LlmClient;
use crate::types::citation::Citation;
use crate::types::config::EngineConfig;
use crate::types::entry::Entry;
use crate::types::exhibit::{normalize_exhibits, CaseInfo, Exhibit, ExhibitInput};
use crate::types::result::ChronologyResult;
use crate::types::schema::SchemaRegistry;

/// Builds medical chronologies from exhibits.
///
/// # Example
///
/// ```rust,ignore
/// let engine = ChronologyEngine::new(Arc::new(client), EngineConfig::default());
/// let result = engine.generate_chronology(inputs, None).await;
/// for event in &result.events {
///     println!("{} {}", event.date, event.provider);
/// }
/// ```
pub struct ChronologyEngine {
    extractor: ParallelExtractor,
    resolver: Option<CitationResolver>,
    config: EngineConfig,
}

impl ChronologyEngine {
    /// Engine over `llm` with the built-in visit-type schemas.
    pub fn new(llm: Arc<dyn LlmClient>, config: EngineConfig) -> Self {
        Self::with_registry(llm, Arc::new(SchemaRegistry::builtin()), config)
    }

    /// Engine over `llm` with custom visit-type schemas.
    pub fn with_registry(
        llm: Arc<dyn LlmClient>,
        registry: Arc<SchemaRegistry>,
        config: EngineConfig,
    ) -> Self {
        let extractor = ParallelExtractor::from_llm(llm, registry, &config);
        Self::from_extractor(extractor, config)
    }

    /// Engine over a pre-built fan-out.
    pub fn from_extractor(extractor: ParallelExtractor, config: EngineConfig) -> Self {
        Self {
            extractor,
            resolver: None,
            config,
        }
    }

    /// Use a fixed resolver instead of one built from each run's exhibits.
    pub fn with_resolver(mut self, resolver: CitationResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Generate a chronology from exhibits in any accepted input shape.
    pub async fn generate_chronology(
        &self,
        inputs: Vec<ExhibitInput>,
        case_info: Option<CaseInfo>,
    ) -> ChronologyResult {
        let run_id = Uuid::now_v7();
        let span = info_span!("chronology", %run_id);

        async move {
            let input_count = inputs.len();
            match normalize_exhibits(inputs) {
                Ok(exhibits) => self.run(run_id, exhibits, case_info).await,
                Err(e) => {
                    warn!(error = %e, "Rejected exhibit input");
                    ChronologyResult::failed(run_id, input_count, e.to_string(), case_info)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Generate a chronology from already-normalized exhibits.
    pub async fn generate(
        &self,
        exhibits: Vec<Exhibit>,
        case_info: Option<CaseInfo>,
    ) -> ChronologyResult {
        let run_id = Uuid::now_v7();
        self.run(run_id, exhibits, case_info)
            .instrument(info_span!("chronology", %run_id))
            .await
    }

    async fn run(
        &self,
        run_id: Uuid,
        exhibits: Vec<Exhibit>,
        case_info: Option<CaseInfo>,
    ) -> ChronologyResult {
        let started = Instant::now();
        let exhibit_count = exhibits.len();
        info!(exhibits = exhibit_count, "Generating chronology");

        let work = AssertUnwindSafe(self.extract_and_reconcile(&exhibits)).catch_unwind();
        let outcome = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let e = ChronologyError::Timeout(limit);
                    error!(error = %e, "Chronology run timed out");
                    return ChronologyResult::failed(run_id, exhibit_count, e.to_string(), case_info)
                        .with_elapsed(started);
                }
            },
            None => work.await,
        };

        let (events, successful, failed) = match outcome {
            Ok(done) => done,
            Err(payload) => {
                let e = ChronologyError::Panicked(panic_message(payload.as_ref()));
                error!(error = %e, "Chronology run panicked");
                return ChronologyResult::failed(run_id, exhibit_count, e.to_string(), case_info)
                    .with_elapsed(started);
            }
        };

        let error = (exhibit_count > 0 && failed == exhibit_count)
            .then(|| format!("all {} exhibits failed extraction", exhibit_count));

        let result = ChronologyResult {
            run_id,
            events,
            processing_time_ms: 0,
            exhibit_count,
            successful_exhibits: successful,
            failed_exhibits: failed,
            error,
            case_info,
        }
        .with_elapsed(started);

        info!(
            events = result.events.len(),
            successful = result.successful_exhibits,
            failed = result.failed_exhibits,
            elapsed_ms = result.processing_time_ms,
            "Chronology complete"
        );
        result
    }

    async fn extract_and_reconcile(&self, exhibits: &[Exhibit]) -> (Vec<Entry>, usize, usize) {
        let parallel = self.extractor.extract_exhibits(exhibits).await;
        let mut events = parallel.entries;

        let built;
        let resolver = match &self.resolver {
            Some(resolver) => Some(resolver),
            None => {
                built = CitationResolver::from_exhibits(exhibits);
                (!built.is_empty()).then_some(&built)
            }
        };
        reconcile_citations(&mut events, resolver);

        if self.config.sort_by_date {
            sort_by_date(&mut events);
        }

        (events, parallel.successful_exhibits, parallel.failed_exhibits)
    }
}

/// Confidence of a citation built from a model-written `page_range`.
const PAGE_GUESS_CONFIDENCE: f32 = 0.3;

/// Confidence of the exhibit-start citation used when nothing is confirmed.
const FALLBACK_CONFIDENCE: f32 = 0.1;

/// A page number or range standing alone or after `p.`/`pp.`/`page(s)`.
/// Exhibit tokens such as `1F` never match since the digits must be
/// followed by a separator or the end of the text.
static PAGE_GUESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\s,;(])(?:pp?\.?\s*|pages?\s+)?(\d{1,6})(?:\s*[-–]\s*(\d{1,6}))?(?:$|[\s,;)])")
        .unwrap()
});

/// Make each entry's citation agree with the resolver.
///
/// A cited page is kept only when the resolver places it inside the entry's
/// own exhibit; otherwise the citation falls back to the exhibit's first
/// page, marked estimated. A page read from the model's `page_range` text
/// is also marked estimated, at low confidence. `page_range` is rewritten
/// from the result.
pub fn reconcile_citations(entries: &mut [Entry], resolver: Option<&CitationResolver>) {
    let Some(resolver) = resolver else {
        for entry in entries.iter_mut() {
            if let Some(citation) = &entry.citation {
                entry.page_range = Some(citation.format());
            }
        }
        return;
    };

    let mut confirmed = 0;
    let mut replaced = 0;
    for entry in entries.iter_mut() {
        let cited = entry
            .citation
            .as_ref()
            .map(|c| (c.absolute_page, c.last_page()))
            .or_else(|| entry.page_range.as_deref().and_then(parse_page_guess));

        let exhibit_id = entry.exhibit_reference.clone();
        let in_exhibit = |page: u32| {
            resolver
                .resolve(page)
                .is_some_and(|r| r.exhibit_id == exhibit_id)
        };

        match cited {
            Some((start, end)) if in_exhibit(start) => {
                let end = if in_exhibit(end) { end } else { start };
                entry.citation = match entry.citation.take() {
                    Some(previous) => resolved_citation(resolver, start, end, previous),
                    None => resolver
                        .citation_range(start, end)
                        .map(|c| c.estimated().with_confidence(PAGE_GUESS_CONFIDENCE)),
                };
                entry.page_range = Some(resolver.format_range(start, end));
                confirmed += 1;
            }
            _ => {
                let Some(range) = resolver.range_of(&exhibit_id) else {
                    continue;
                };
                let start = range.start_page;
                entry.citation = resolver
                    .citation(start)
                    .map(|c| c.estimated().with_confidence(FALLBACK_CONFIDENCE));
                entry.page_range = Some(resolver.format(start));
                replaced += 1;
            }
        }
        entry.citation_confidence = entry.citation.as_ref().map(|c| c.confidence);
    }

    debug!(confirmed, replaced, "Reconciled citations");
}

/// Resolver's exhibit-relative numbering with the previous citation's
/// source type, Bates number and confidence carried over.
fn resolved_citation(
    resolver: &CitationResolver,
    start: u32,
    end: u32,
    previous: Citation,
) -> Option<Citation> {
    let mut citation = resolver.citation_range(start, end)?;
    citation.source_type = previous.source_type;
    citation.bates_number = previous.bates_number;
    Some(
        citation
            .with_estimated(previous.is_estimated)
            .with_confidence(previous.confidence),
    )
}

/// "12", "12-14" or "pp. 12-14" from a model-supplied page range.
fn parse_page_guess(guess: &str) -> Option<(u32, u32)> {
    let caps = PAGE_GUESS.captures(guess.trim())?;
    let start = caps.get(1)?.as_str().parse::<u32>().ok()?;
    let end = caps
        .get(2)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|&end| end >= start)
        .unwrap_or(start);
    Some((start, end))
}

/// Stable date sort; unparseable dates go last in their original order.
pub fn sort_by_date(entries: &mut [Entry]) {
    entries.sort_by_key(|e| match e.parsed_date() {
        Some(date) => (0, Some(date)),
        None => (1, None),
    });
}

impl ChronologyResult {
    fn with_elapsed(mut self, started: Instant) -> Self {
        self.processing_time_ms = started.elapsed().as_millis() as u64;
        self
    }
}
