//! Extraction pipeline - the core of the library.
//!
//! The pipeline orchestrates:
//! - Exhibit fan-out with a concurrency bound
//! - Text extraction over chunked exhibit text
//! - Vision extraction over batched page images
//! - Recovery of sparse entries (merged-chunk retry, vision re-run)
//! - Citation reconciliation and date ordering
//!
//! Every LLM call goes through retry with backoff and a tolerant parser.

pub mod chunk_retry;
pub mod chunker;
pub mod engine;
pub mod extract;
pub mod parallel;
pub mod parser;
pub mod prompts;
pub mod rate_limited;
pub mod recovery;
pub mod retry;
pub mod text;
pub mod vision;

pub use chunk_retry::{merge_chunks, ChunkMergeRetryHandler, CONTINUATION_MARKER};
pub use chunker::{TextChunk, TextChunker};
pub use engine::{reconcile_citations, sort_by_date, ChronologyEngine};
pub use extract::EntryGenerator;
pub use parallel::ParallelExtractor;
pub use parser::{parse_response, strip_code_fence, Record};
pub use prompts::{
    format_merged_retry_prompt, format_text_prompt, format_vision_prompt, SYSTEM_PROMPT,
    TEXT_EXTRACT_PROMPT, VISION_EXTRACT_PROMPT,
};
pub use rate_limited::RateLimitedLlm;
pub use recovery::{RecoveryHandler, RecoveryOutcome};
pub use retry::{LlmClientExt, RetryPolicy, RetryingLlm};
pub use text::TextExtractor;
pub use vision::VisionExtractor;
