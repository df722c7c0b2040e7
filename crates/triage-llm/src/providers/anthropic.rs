//! Anthropic Messages API. Ordered after every other provider.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use triage_resilience::LlmError;

use super::http::{post_json, text_at};
use super::Provider;
use crate::config::{ApiProviderConfig, GenerationSettings};

pub const NAME: &str = "anthropic";

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    generation: GenerationSettings,
    client: reqwest::Client,
    hint: String,
}

impl AnthropicProvider {
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
                "Get an Anthropic API key at https://console.anthropic.com/ and set {}",
                config.api_key_env
            ),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
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
            "model": self.model,
            "max_tokens": self.generation.max_tokens,
            "temperature": self.generation.temperature,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let request = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION);
        let envelope = post_json(NAME, request, &body, timeout).await?;
        text_at(NAME, &envelope, "/content/0/text")
    }

    fn setup_hint(&self) -> &str {
        &self.hint
    }
}
