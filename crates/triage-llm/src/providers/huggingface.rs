//! HuggingFace Inference API (text-generation task).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use triage_resilience::LlmError;

use super::http::{post_json, text_at};
use super::Provider;
use crate::config::{ApiProviderConfig, GenerationSettings};

pub const NAME: &str = "huggingface";

pub struct HuggingFaceProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    generation: GenerationSettings,
    client: reqwest::Client,
    hint: String,
}

impl HuggingFaceProvider {
    pub fn new(
        config: &ApiProviderConfig,
        api_key: Option<String>,
        generation: GenerationSettings,
        client: reqwest::Client,
    ) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            generation,
            client,
            hint: format!(
                "Get a HuggingFace token at https://huggingface.co/settings/tokens and set {}",
                config.api_key_env
            ),
        }
    }
}

#[async_trait]
impl Provider for HuggingFaceProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, LlmError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(LlmError::unavailable(NAME, "API key not set"));
        };

        let body = json!({
            "inputs": prompt,
            "parameters": {
                "temperature": self.generation.temperature,
                "max_new_tokens": self.generation.max_tokens,
                "return_full_text": false
            }
        });

        let request = self
            .client
            .post(format!("{}/{}", self.base_url, self.model))
            .bearer_auth(api_key);
        let envelope = post_json(NAME, request, &body, timeout).await?;

        // The endpoint answers with a list of generations or a single object.
        match envelope {
            Value::Array(_) => text_at(NAME, &envelope, "/0/generated_text"),
            _ => text_at(NAME, &envelope, "/generated_text"),
        }
    }

    fn setup_hint(&self) -> &str {
        &self.hint
    }
}
