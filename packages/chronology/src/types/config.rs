//! Configuration types for the chronology pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Model parameters for every LLM call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier passed to the LLM port.
    pub model: String,

    /// Maximum output tokens per call.
    ///
    /// Chronology output is long; truncation is recovered by the parser
    /// but costs entries. Default: 8192.
    pub max_tokens: u32,

    /// Sampling temperature. Default: 0.0 (deterministic extraction).
    pub temperature: f32,

    /// Optional system prompt override.
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 8192,
            temperature: 0.0,
            system_prompt: None,
        }
    }
}

impl ModelConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Text chunking thresholds (in bytes of UTF-8 text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Text longer than this is split. Default: 40,000.
    pub max_chars: usize,

    /// Characters repeated at the start of the next chunk. Default: 500.
    pub overlap: usize,

    /// Minimum forward progress per chunk. Default: 1,000.
    pub min_chunk: usize,

    /// How far back from the target to look for a boundary. Default: 2,000.
    pub search_window: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 40_000,
            overlap: 500,
            min_chunk: 1_000,
            search_window: 2_000,
        }
    }
}

impl ChunkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_min_chunk(mut self, min_chunk: usize) -> Self {
        self.min_chunk = min_chunk;
        self
    }

    pub fn with_search_window(mut self, window: usize) -> Self {
        self.search_window = window;
        self
    }
}

/// Search-based citation matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Minimum page score to qualify. Default: 3.0 (a date hit alone).
    pub match_threshold: f32,

    /// Fraction of the threshold an adjacent page needs to extend the range.
    /// Default: 0.7.
    pub adjacent_ratio: f32,

    /// Shortest non-date term worth searching for. Default: 4.
    pub min_term_chars: usize,

    /// Terms up to this length use word-boundary matching. Default: 10.
    pub word_boundary_max_chars: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            match_threshold: 3.0,
            adjacent_ratio: 0.7,
            min_term_chars: 4,
            word_boundary_max_chars: 10,
        }
    }
}

impl MatcherConfig {
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.match_threshold = threshold;
        self
    }
}

/// Backoff for transient LLM errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt. Default: 5.
    pub max_retries: u32,

    /// Delay before the first retry. Default: 1s.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Upper bound on the un-jittered delay. Default: 60s.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

/// Vision extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisionConfig {
    /// Images per request. Default: 10.
    pub batch_size: usize,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

/// Layout of the source document, which decides the extraction route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EreFormat {
    /// Raw agency download: text plus scanned pages
    RawSsa,
    /// Already OCR'd: text only
    Processed,
    /// Hearing transcript: page images only
    CourtTranscript,
    #[default]
    Unknown,
}

impl EreFormat {
    pub fn uses_text(&self) -> bool {
        !matches!(self, Self::CourtTranscript)
    }

    pub fn uses_vision(&self) -> bool {
        !matches!(self, Self::Processed)
    }

    /// Sparse-entry recovery only makes sense when both routes run.
    pub fn uses_recovery(&self) -> bool {
        self.uses_text() && self.uses_vision()
    }
}

/// Fan-out across exhibits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Exhibits in flight at once. Default: 5.
    pub max_concurrent: usize,

    /// Document layout. Default: unknown (full path).
    #[serde(default)]
    pub format: EreFormat,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            format: EreFormat::Unknown,
        }
    }
}

impl ParallelConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_format(mut self, format: EreFormat) -> Self {
        self.format = format;
        self
    }
}

/// Top-level engine settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on a whole run. None means unbounded.
    #[serde(default, with = "option_duration_millis")]
    pub timeout: Option<Duration>,

    /// Sort events by parsed date (unparseable dates last).
    #[serde(default)]
    pub sort_by_date: bool,

    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_sort_by_date(mut self, sort: bool) -> Self {
        self.sort_by_date = sort;
        self
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_matcher(mut self, matcher: MatcherConfig) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_vision(mut self, vision: VisionConfig) -> Self {
        self.vision = vision;
        self
    }

    pub fn with_parallel(mut self, parallel: ParallelConfig) -> Self {
        self.parallel = parallel;
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.chunker.max_chars, 40_000);
        assert_eq!(config.chunker.overlap, 500);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert_eq!(config.vision.batch_size, 10);
        assert_eq!(config.parallel.max_concurrent, 5);
        assert_eq!(config.matcher.match_threshold, 3.0);
        assert!(config.timeout.is_none());
    }

    #[test]
    fn test_format_routing() {
        assert!(!EreFormat::CourtTranscript.uses_text());
        assert!(!EreFormat::CourtTranscript.uses_recovery());
        assert!(!EreFormat::Processed.uses_vision());
        assert!(!EreFormat::Processed.uses_recovery());
        assert!(EreFormat::RawSsa.uses_recovery());
        assert!(EreFormat::Unknown.uses_recovery());
    }

    #[test]
    fn test_engine_config_from_partial_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"timeout": 30000, "parallel": {"max_concurrent": 2, "format": "court_transcript"}}"#,
        )
        .unwrap();
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.parallel.max_concurrent, 2);
        assert_eq!(config.parallel.format, EreFormat::CourtTranscript);
        assert_eq!(config.chunker, ChunkerConfig::default());
    }

    #[test]
    fn test_max_concurrent_floor() {
        assert_eq!(ParallelConfig::default().with_max_concurrent(0).max_concurrent, 1);
    }
}
