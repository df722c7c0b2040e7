//! Google Gemini `generateContent` API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use triage_resilience::LlmError;

use super::http::{post_json, text_at};
use super::Provider;
use crate::config::{ApiProviderConfig, GenerationSettings};

pub const NAME: &str = "gemini";

pub struct GeminiProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    generation: GenerationSettings,
    client: reqwest::Client,
    hint: String,
}

impl GeminiProvider {
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
                "Get a free Gemini API key at https://aistudio.google.com/ and set {}",
                config.api_key_env
            ),
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
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

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": self.generation.temperature,
                "maxOutputTokens": self.generation.max_tokens
            }
        });

        let request = self.client.post(url).query(&[("key", api_key)]);
        let envelope = post_json(NAME, request, &body, timeout).await?;
        text_at(NAME, &envelope, "/candidates/0/content/parts/0/text")
    }

    fn setup_hint(&self) -> &str {
        &self.hint
    }
}
