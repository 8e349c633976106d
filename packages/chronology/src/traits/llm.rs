//! LLM port.
//!
//! The pipeline only needs two capabilities from a provider: plain text
//! generation and generation over page images. Implementations wrap a
//! specific provider and translate its failures into [`LlmError`] kinds so
//! the retry layer can tell transient errors from fatal ones.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LlmResult;
use crate::types::config::ModelConfig;

/// Parameters for a single LLM call.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: Option<String>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>, model: &ModelConfig) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.model.clone(),
            max_tokens: model.max_tokens,
            temperature: model.temperature,
            system: model.system_prompt.clone(),
        }
    }

    /// Set the system prompt unless the model config already overrides it.
    pub fn with_default_system(mut self, system: impl Into<String>) -> Self {
        if self.system.is_none() {
            self.system = Some(system.into());
        }
        self
    }
}

/// LLM provider abstraction.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion for a text prompt.
    async fn generate(&self, request: &LlmRequest) -> LlmResult<String>;

    /// Generate a completion for a prompt over page images (PNG/JPEG bytes).
    async fn generate_with_vision(
        &self,
        request: &LlmRequest,
        images: &[Vec<u8>],
    ) -> LlmResult<String>;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    async fn generate(&self, request: &LlmRequest) -> LlmResult<String> {
        (**self).generate(request).await
    }

    async fn generate_with_vision(
        &self,
        request: &LlmRequest,
        images: &[Vec<u8>],
    ) -> LlmResult<String> {
        (**self).generate_with_vision(request, images).await
    }
}
