//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the chronology
//! library without making real LLM calls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::error::{ChronologyError, LlmError, LlmResult, Result};
use crate::traits::extractor::{Extractor, ExtractorKind};
use crate::traits::llm::{LlmClient, LlmRequest};
use crate::types::entry::Entry;
use crate::types::exhibit::Exhibit;

/// Which LLM capability a call used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Text,
    Vision,
}

/// Record of a call made to the mock LLM.
#[derive(Debug, Clone)]
pub struct MockLlmCall {
    pub kind: CallKind,
    pub prompt: String,
    pub image_count: usize,
}

/// A mock LLM client for testing.
///
/// Responses are chosen in this order: the FIFO queue built with
/// [`then_respond`](Self::then_respond) / [`then_error`](Self::then_error),
/// the first prompt rule whose needle appears in the prompt, the vision
/// response for vision calls, then the default response (`"[]"`).
///
/// Clones share state, so a clone handed to the pipeline still reports its
/// calls through the original.
#[derive(Clone)]
pub struct MockLlm {
    queue: Arc<Mutex<VecDeque<LlmResult<String>>>>,
    rules: Arc<RwLock<Vec<(String, LlmResult<String>)>>>,
    default_response: Arc<RwLock<String>>,
    vision_response: Arc<RwLock<Option<String>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    calls: Arc<RwLock<Vec<MockLlmCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            queue: Arc::default(),
            rules: Arc::default(),
            default_response: Arc::new(RwLock::new("[]".to_string())),
            vision_response: Arc::default(),
            delay: Arc::default(),
            calls: Arc::default(),
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
        }
    }

    /// Response used when nothing more specific applies.
    pub fn with_default_response(self, response: impl Into<String>) -> Self {
        *self.default_response.write().unwrap() = response.into();
        self
    }

    /// Response for vision calls not covered by the queue or a rule.
    pub fn with_vision_response(self, response: impl Into<String>) -> Self {
        *self.vision_response.write().unwrap() = Some(response.into());
        self
    }

    /// Respond with `response` whenever the prompt contains `needle`.
    pub fn with_response_for(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules
            .write()
            .unwrap()
            .push((needle.into(), Ok(response.into())));
        self
    }

    /// Fail with `error` whenever the prompt contains `needle`.
    pub fn with_error_for(self, needle: impl Into<String>, error: LlmError) -> Self {
        self.rules.write().unwrap().push((needle.into(), Err(error)));
        self
    }

    /// Queue a one-shot response.
    pub fn then_respond(self, response: impl Into<String>) -> Self {
        self.queue.lock().unwrap().push_back(Ok(response.into()));
        self
    }

    /// Queue a one-shot error.
    pub fn then_error(self, error: LlmError) -> Self {
        self.queue.lock().unwrap().push_back(Err(error));
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.write().unwrap() = Some(delay);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockLlmCall> {
        self.calls.read().unwrap().clone()
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    /// Most calls that were ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn respond(&self, kind: CallKind, prompt: &str, image_count: usize) -> LlmResult<String> {
        self.calls.write().unwrap().push(MockLlmCall {
            kind,
            prompt: prompt.to_string(),
            image_count,
        });

        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        let delay = *self.delay.read().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(queued) = self.queue.lock().unwrap().pop_front() {
            return queued;
        }

        let rule = self
            .rules
            .read()
            .unwrap()
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone());
        if let Some(response) = rule {
            return response;
        }

        if kind == CallKind::Vision {
            if let Some(response) = self.vision_response.read().unwrap().clone() {
                return Ok(response);
            }
        }

        Ok(self.default_response.read().unwrap().clone())
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, request: &LlmRequest) -> LlmResult<String> {
        self.respond(CallKind::Text, &request.prompt, 0).await
    }

    async fn generate_with_vision(
        &self,
        request: &LlmRequest,
        images: &[Vec<u8>],
    ) -> LlmResult<String> {
        self.respond(CallKind::Vision, &request.prompt, images.len())
            .await
    }
}

#[derive(Debug, Clone)]
enum Script {
    Entries(Vec<Entry>),
    Fail(String),
    Panic,
}

/// An [`Extractor`] that returns scripted results per exhibit id.
///
/// Unscripted exhibits yield no entries. Tracks concurrency so tests can
/// assert on the fan-out bound.
#[derive(Clone)]
pub struct ScriptedExtractor {
    kind: ExtractorKind,
    scripts: Arc<RwLock<HashMap<String, Script>>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedExtractor {
    pub fn new(kind: ExtractorKind) -> Self {
        Self {
            kind,
            scripts: Arc::default(),
            delay: None,
            calls: Arc::default(),
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
        }
    }

    pub fn with_entries(self, exhibit_id: impl Into<String>, entries: Vec<Entry>) -> Self {
        self.script(exhibit_id, Script::Entries(entries))
    }

    /// Fail the exhibit with an `ExhibitFailed` error.
    pub fn with_failure(self, exhibit_id: impl Into<String>, reason: impl Into<String>) -> Self {
        self.script(exhibit_id, Script::Fail(reason.into()))
    }

    /// Panic while extracting the exhibit.
    pub fn with_panic(self, exhibit_id: impl Into<String>) -> Self {
        self.script(exhibit_id, Script::Panic)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script(self, exhibit_id: impl Into<String>, script: Script) -> Self {
        self.scripts.write().unwrap().insert(exhibit_id.into(), script);
        self
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, exhibit: &Exhibit) -> Result<Vec<Entry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let script = self
            .scripts
            .read()
            .unwrap()
            .get(&exhibit.exhibit_id)
            .cloned();
        match script {
            Some(Script::Entries(entries)) => Ok(entries),
            Some(Script::Fail(reason)) => Err(ChronologyError::ExhibitFailed {
                exhibit_id: exhibit.exhibit_id.clone(),
                reason,
            }),
            Some(Script::Panic) => panic!("scripted panic for exhibit {}", exhibit.exhibit_id),
            None => Ok(Vec::new()),
        }
    }

    fn kind(&self) -> ExtractorKind {
        self.kind
    }
}

/// Counts a call as in flight until dropped, panics included.
struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::config::ModelConfig;

    fn request(prompt: &str) -> LlmRequest {
        LlmRequest::new(prompt, &ModelConfig::default())
    }

    #[tokio::test]
    async fn test_mock_llm_queue_before_rules() {
        let mock = MockLlm::new()
            .with_response_for("exhibit 2F", "rule")
            .then_respond("queued");

        assert_eq!(mock.generate(&request("exhibit 2F")).await.unwrap(), "queued");
        assert_eq!(mock.generate(&request("exhibit 2F")).await.unwrap(), "rule");
        assert_eq!(mock.generate(&request("exhibit 1F")).await.unwrap(), "[]");
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_llm_vision_response() {
        let mock = MockLlm::new()
            .with_default_response("text")
            .with_vision_response("vision");

        let out = mock
            .generate_with_vision(&request("pages"), &[vec![1], vec![2]])
            .await
            .unwrap();
        assert_eq!(out, "vision");
        assert_eq!(mock.calls()[0].image_count, 2);
        assert_eq!(mock.calls()[0].kind, CallKind::Vision);
    }

    #[tokio::test]
    async fn test_mock_llm_error_rule() {
        let mock = MockLlm::new().with_error_for("2F", LlmError::throttling("slow down"));
        let err = mock.generate(&request("exhibit 2F")).await.unwrap_err();
        assert_eq!(err.kind, crate::error::LlmErrorKind::Throttling);
    }

    #[tokio::test]
    async fn test_scripted_extractor() {
        let extractor = ScriptedExtractor::new(ExtractorKind::Text)
            .with_entries("1F", vec![Entry::new("2024-01-01", "1F")])
            .with_failure("2F", "boom");

        let ok = extractor.extract(&Exhibit::new("1F", "x")).await.unwrap();
        assert_eq!(ok.len(), 1);
        assert!(extractor.extract(&Exhibit::new("2F", "x")).await.is_err());
        assert!(extractor
            .extract(&Exhibit::new("9F", "x"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(extractor.call_count(), 3);
        assert_eq!(extractor.max_in_flight(), 1);
    }
}
