//! Core trait abstractions for the chronology library.
//!
//! Applications provide an [`llm::LlmClient`]; the pipeline provides the
//! [`extractor::Extractor`] implementations.

pub mod extractor;
pub mod llm;
