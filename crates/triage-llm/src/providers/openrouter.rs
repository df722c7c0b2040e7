//! OpenRouter chat-completions API (OpenAI-compatible envelope).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use triage_resilience::LlmError;

use super::http::{post_json, text_at};
use super::Provider;
use crate::config::{ApiProviderConfig, GenerationSettings};

pub const NAME: &str = "openrouter";

/// Attribution headers OpenRouter asks clients to send.
const REFERER: &str = "https://github.com/triage-llm/triage-llm";
const TITLE: &str = "triage-llm";

pub struct OpenRouterProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    generation: GenerationSettings,
    client: reqwest::Client,
    hint: String,
}

impl OpenRouterProvider {
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
                "Get a free OpenRouter API key at https://openrouter.ai/ and set {}",
                config.api_key_env
            ),
        }
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
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
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.generation.max_tokens,
            "temperature": self.generation.temperature
        });

        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .header("HTTP-Referer", REFERER)
            .header("X-Title", TITLE);
        let envelope = post_json(NAME, request, &body, timeout).await?;
        text_at(NAME, &envelope, "/choices/0/message/content")
    }

    fn setup_hint(&self) -> &str {
        &self.hint
    }
}
