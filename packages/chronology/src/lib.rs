//! Medical Chronology Extraction Library
//!
//! Turns a case's exhibits (searchable text, scanned page images, or both)
//! into a list of dated, citation-linked medical events.
//!
//! # Design Philosophy
//!
//! **"One LLM port, many recovery paths"**
//!
//! - Exhibits are processed concurrently under a fixed bound
//! - Long text is chunked at natural boundaries and merged back
//! - Model output is parsed tolerantly; malformed records are dropped
//! - Sparse entries get a second chance (merged chunks, then vision)
//! - Every entry carries a page citation the resolver can vouch for
//!
//! # Usage
//!
//! ```rust,ignore
//! use chronology::{ChronologyEngine, EngineConfig, ExhibitInput};
//! use chronology::testing::MockLlm;
//!
//! let llm = MockLlm::new().with_default_response(r#"[{"date": "2024-01-15"}]"#);
//! let engine = ChronologyEngine::new(Arc::new(llm), EngineConfig::default());
//!
//! let inputs = vec![ExhibitInput::from(("1F", "Office visit 01/15/2024 ..."))];
//! let result = engine.generate_chronology(inputs, None).await;
//! assert!(result.is_success());
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (LlmClient, Extractor)
//! - [`types`] - Exhibits, entries, citations, schemas and config
//! - [`pipeline`] - Chunking, extraction, recovery and the engine
//! - [`citations`] - Header detection, search matching, page resolution
//! - [`testing`] - Mock implementations for testing

pub mod citations;
pub mod error;
pub mod pipeline;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "openai")]
pub mod ai;

// Re-export core types at crate root
pub use error::{ChronologyError, LlmError, LlmErrorKind, LlmResult, Result};
pub use traits::{
    extractor::{Extractor, ExtractorKind},
    llm::{LlmClient, LlmRequest},
};
pub use types::{
    citation::{Citation, SourceType},
    config::{
        ChunkerConfig, EngineConfig, EreFormat, MatcherConfig, ModelConfig, ParallelConfig,
        RetryConfig, VisionConfig,
    },
    entry::{EnrichmentSource, Entry, VisitType, NOT_SPECIFIED},
    exhibit::{
        normalize_exhibits, CaseInfo, Exhibit, ExhibitContext, ExhibitInput, ExhibitRange,
        PageText,
    },
    result::{ChronologyResult, ExhibitExtractionResult, ParallelExtractionResult},
    schema::{FieldSpec, SchemaRegistry, VisitSchema},
};

// Re-export citation components
pub use citations::{CitationMatcher, CitationResolver, HeaderDetector};

// Re-export pipeline components
pub use pipeline::{
    // Engine and fan-out
    ChronologyEngine, ParallelExtractor,
    // Extractors
    EntryGenerator, TextExtractor, VisionExtractor,
    // Recovery
    ChunkMergeRetryHandler, RecoveryHandler,
    // Chunking and parsing
    parse_response, TextChunk, TextChunker,
    // Provider wrappers
    LlmClientExt, RateLimitedLlm, RetryPolicy, RetryingLlm,
};

// Re-export testing utilities
pub use testing::{MockLlm, ScriptedExtractor};
