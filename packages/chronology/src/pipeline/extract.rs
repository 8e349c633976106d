//! Shared LLM call path: prompt → retried call → tolerant parse → validated
//! entries.

use std::sync::Arc;

use crate::error::LlmResult;
use crate::pipeline::parser::parse_response;
use crate::pipeline::prompts::SYSTEM_PROMPT;
use crate::pipeline::retry::RetryPolicy;
use crate::traits::llm::{LlmClient, LlmRequest};
use crate::types::config::ModelConfig;
use crate::types::entry::{validate_records, Entry};
use crate::types::schema::SchemaRegistry;

/// Turns prompts into validated entries.
///
/// Cheap to clone; the client and schema registry are shared.
#[derive(Clone)]
pub struct EntryGenerator {
    llm: Arc<dyn LlmClient>,
    registry: Arc<SchemaRegistry>,
    model: ModelConfig,
    retry: RetryPolicy,
}

impl EntryGenerator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: Arc<SchemaRegistry>,
        model: ModelConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            llm,
            registry,
            model,
            retry,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn request(&self, prompt: String) -> LlmRequest {
        LlmRequest::new(prompt, &self.model).with_default_system(SYSTEM_PROMPT)
    }

    /// Text prompt to entries attributed to `exhibit_id`.
    pub async fn from_text(&self, prompt: String, exhibit_id: &str) -> LlmResult<Vec<Entry>> {
        let request = self.request(prompt);
        let raw = self
            .retry
            .execute("generate", || self.llm.generate(&request))
            .await?;
        Ok(self.to_entries(&raw, exhibit_id))
    }

    /// Vision prompt over `images` to entries attributed to `exhibit_id`.
    pub async fn from_images(
        &self,
        prompt: String,
        images: &[Vec<u8>],
        exhibit_id: &str,
    ) -> LlmResult<Vec<Entry>> {
        let request = self.request(prompt);
        let raw = self
            .retry
            .execute("generate_with_vision", || {
                self.llm.generate_with_vision(&request, images)
            })
            .await?;
        Ok(self.to_entries(&raw, exhibit_id))
    }

    fn to_entries(&self, raw: &str, exhibit_id: &str) -> Vec<Entry> {
        let records = parse_response(raw);
        let mut entries = validate_records(&records, exhibit_id);
        // Chunk labels like "3F_chunk2" must not leak into references
        for entry in &mut entries {
            entry.exhibit_reference = exhibit_id.to_string();
        }
        tracing::debug!(
            exhibit_id,
            records = records.len(),
            entries = entries.len(),
            "Parsed LLM response"
        );
        entries
    }
}
