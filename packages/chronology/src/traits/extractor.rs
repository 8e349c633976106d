//! Extractor trait: one exhibit in, validated entries out.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{entry::Entry, exhibit::Exhibit};

/// Which part of an exhibit an extractor reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractorKind {
    Text,
    Vision,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Vision => "vision",
        }
    }
}

/// Narrow extraction seam shared by the text and vision extractors.
///
/// Implementations return whatever entries they managed to extract.
/// Provider failures after retries are logged and yield the partial list;
/// an `Err` means the exhibit itself could not be processed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, exhibit: &Exhibit) -> Result<Vec<Entry>>;

    fn kind(&self) -> ExtractorKind;
}
