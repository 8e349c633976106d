//! OpenAI implementation of the LLM port.
//!
//! A reference implementation over the chat completions API. Vision calls
//! send page images inline as base64 data URLs.
//!
//! # Example
//!
//! ```rust,ignore
//! use chronology::ai::OpenAI;
//!
//! let llm = OpenAI::from_env()?.with_model("gpt-4o");
//! let engine = ChronologyEngine::new(Arc::new(llm), EngineConfig::default());
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{ChronologyError, LlmError, LlmErrorKind, LlmResult, Result};
use crate::traits::llm::{LlmClient, LlmRequest};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-backed [`LlmClient`].
///
/// The model named in each [`LlmRequest`] wins; `model` is only used when a
/// request leaves it empty.
#[derive(Clone)]
pub struct OpenAI {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
}

impl OpenAI {
    /// Create a new OpenAI client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: SecretString::from(api_key.into()),
            model: "gpt-4o".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from `OPENAI_API_KEY`, honoring `OPENAI_BASE_URL` when set.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ChronologyError::Config("OPENAI_API_KEY not set".into()))?;
        let client = Self::new(api_key);
        Ok(match std::env::var("OPENAI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => client.with_base_url(url),
            _ => client,
        })
    }

    /// Set the fallback chat model (default: gpt-4o).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set a custom base URL (for Azure, proxies, etc.).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Per-request HTTP timeout. Fails if the HTTP client cannot be built.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChronologyError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(self)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, request: &LlmRequest, user_content: Value) -> LlmResult<String> {
        let model = if request.model.is_empty() {
            self.model.as_str()
        } else {
            request.model.as_str()
        };

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": user_content}));

        let body = ChatRequest {
            model,
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &error_text));
        }

        let chat_response: ChatResponse = response.json().await.map_err(|e| {
            LlmError::new(LlmErrorKind::InvalidResponse, e.to_string())
        })?;

        if let Some(usage) = &chat_response.usage {
            debug!(
                model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "OpenAI call complete"
            );
        }

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::new(LlmErrorKind::InvalidResponse, "No response from OpenAI"))
    }
}

#[async_trait]
impl LlmClient for OpenAI {
    async fn generate(&self, request: &LlmRequest) -> LlmResult<String> {
        self.chat(request, Value::String(request.prompt.clone()))
            .await
    }

    async fn generate_with_vision(
        &self,
        request: &LlmRequest,
        images: &[Vec<u8>],
    ) -> LlmResult<String> {
        self.chat(request, vision_content(&request.prompt, images))
            .await
    }
}

/// User content parts: the prompt followed by one data URL per image.
fn vision_content(prompt: &str, images: &[Vec<u8>]) -> Value {
    let mut parts = vec![json!({"type": "text", "text": prompt})];
    parts.extend(images.iter().map(|image| {
        json!({
            "type": "image_url",
            "image_url": {"url": data_url(image), "detail": "high"}
        })
    }));
    Value::Array(parts)
}

fn data_url(image: &[u8]) -> String {
    format!("data:{};base64,{}", image_mime(image), STANDARD.encode(image))
}

fn image_mime(image: &[u8]) -> &'static str {
    match image {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, ..] => "image/jpeg",
        [b'G', b'I', b'F', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "image/png",
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    let kind = if e.is_timeout() {
        LlmErrorKind::Timeout
    } else {
        LlmErrorKind::Network
    };
    LlmError::new(kind, e.to_string())
}

/// Map an HTTP failure onto an error kind, keeping OpenAI's error code.
fn status_error(status: StatusCode, body: &str) -> LlmError {
    let kind = match status.as_u16() {
        429 => LlmErrorKind::Throttling,
        500 | 502 | 503 | 504 | 529 => LlmErrorKind::ServiceUnavailable,
        408 => LlmErrorKind::Timeout,
        401 | 403 => LlmErrorKind::Authentication,
        400 | 404 | 413 | 422 => LlmErrorKind::InvalidRequest,
        _ => LlmErrorKind::Other,
    };

    let parsed: Option<ErrorEnvelope> = serde_json::from_str(body).ok();
    let (message, code) = match parsed {
        Some(envelope) => (
            envelope.error.message,
            envelope.error.code.or(envelope.error.error_type),
        ),
        None => (body.to_string(), None),
    };

    let error = LlmError::new(kind, format!("OpenAI API error ({}): {}", status, message));
    match code {
        Some(code) => error.with_code(code),
        None => error,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let throttled = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "Rate limit reached", "code": "rate_limit_exceeded"}}"#,
        );
        assert_eq!(throttled.kind, LlmErrorKind::Throttling);
        assert_eq!(throttled.code.as_deref(), Some("rate_limit_exceeded"));
        assert!(throttled.message.contains("Rate limit reached"));

        assert_eq!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, "").kind,
            LlmErrorKind::ServiceUnavailable
        );
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED, "nope").kind,
            LlmErrorKind::Authentication
        );

        let too_big = status_error(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "too long", "type": "invalid_request_error"}}"#,
        );
        assert_eq!(too_big.kind, LlmErrorKind::InvalidRequest);
        assert_eq!(too_big.code.as_deref(), Some("invalid_request_error"));
    }

    #[test]
    fn test_vision_content_uses_data_urls() {
        let png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A];
        let jpeg = vec![0xFF, 0xD8, 0xFF];
        let content = vision_content("describe", &[png, jpeg]);

        let parts = content.as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], "describe");
        let url = parts[1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        let url = parts[2]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_with_timeout_builds_client() {
        let client = OpenAI::new("sk-test")
            .with_model("gpt-4o-mini")
            .with_timeout(Duration::from_secs(30))
            .unwrap();
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = OpenAI::new("sk-test").with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
