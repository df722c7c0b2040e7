//! Model backends behind one interface.
//!
//! A [`Provider`] turns a prompt into text. It knows nothing about retries,
//! breakers or fallback; the router layers those on top.

pub mod anthropic;
pub mod gemini;
pub mod http;
pub mod huggingface;
pub mod local;
pub mod openrouter;
pub mod process;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use triage_resilience::LlmError;

use crate::config::RouterConfig;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use huggingface::HuggingFaceProvider;
pub use local::LocalProcessProvider;
pub use openrouter::OpenRouterProvider;
pub use process::{CommandOutput, CommandRunner, RunError, TokioCommandRunner};

/// A single model backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used in logs, stats and error reports.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Cheap local precondition check (credential present, binary found).
    ///
    /// Must not touch the network or spawn processes.
    fn is_available(&self) -> bool;

    /// One attempt. Retries belong to the caller.
    async fn call(&self, prompt: &str, timeout: Duration) -> Result<String, LlmError>;

    /// Local JSON extraction without any model round-trip.
    fn parse_json(&self, raw: &str) -> Result<Value, LlmError> {
        crate::repair::extract_json(raw)
    }

    /// One-line instruction for making this provider available.
    fn setup_hint(&self) -> &str;
}

/// Build the configured providers in routing order.
///
/// Credentials are read from the environment here, once.
pub fn build_providers(config: &RouterConfig) -> Vec<Box<dyn Provider>> {
    let client = http::shared_client();
    let generation = config.generation;
    let apis = &config.providers;

    let mut remote: Vec<Box<dyn Provider>> = Vec::new();
    if apis.gemini.enabled {
        remote.push(Box::new(GeminiProvider::new(
            &apis.gemini,
            apis.gemini.read_api_key(),
            generation,
            client.clone(),
        )));
    }
    if apis.openrouter.enabled {
        remote.push(Box::new(OpenRouterProvider::new(
            &apis.openrouter,
            apis.openrouter.read_api_key(),
            generation,
            client.clone(),
        )));
    }
    if apis.huggingface.enabled {
        remote.push(Box::new(HuggingFaceProvider::new(
            &apis.huggingface,
            apis.huggingface.read_api_key(),
            generation,
            client.clone(),
        )));
    }

    let mut providers: Vec<Box<dyn Provider>> = Vec::new();
    let local = config
        .local
        .enabled
        .then(|| Box::new(LocalProcessProvider::from_config(&config.local)) as Box<dyn Provider>);

    if config.prefer_local {
        providers.extend(local);
        providers.extend(remote);
    } else {
        providers.extend(remote);
        providers.extend(local);
    }

    if apis.anthropic.enabled {
        providers.push(Box::new(AnthropicProvider::new(
            &apis.anthropic,
            apis.anthropic.read_api_key(),
            generation,
            client,
        )));
    }
    providers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(providers: &[Box<dyn Provider>]) -> Vec<&str> {
        providers.iter().map(|p| p.name()).collect()
    }

    #[test]
    fn local_first_by_default_and_anthropic_last() {
        let providers = build_providers(&RouterConfig::default());
        assert_eq!(
            names(&providers),
            ["ollama", "gemini", "openrouter", "huggingface", "anthropic"]
        );
    }

    #[test]
    fn prefer_local_false_moves_local_behind_free_apis() {
        let config = RouterConfig {
            prefer_local: false,
            ..RouterConfig::default()
        };
        let providers = build_providers(&config);
        assert_eq!(
            names(&providers),
            ["gemini", "openrouter", "huggingface", "ollama", "anthropic"]
        );
    }

    #[test]
    fn disabled_providers_are_omitted() {
        let mut config = RouterConfig::default();
        config.local.enabled = false;
        config.providers.huggingface.enabled = false;
        config.providers.anthropic.enabled = false;
        let providers = build_providers(&config);
        assert_eq!(names(&providers), ["gemini", "openrouter"]);
    }

    #[test]
    fn missing_credentials_mean_unavailable() {
        let mut config = RouterConfig::default();
        config.local.enabled = false;
        for api in [
            &mut config.providers.gemini,
            &mut config.providers.openrouter,
            &mut config.providers.huggingface,
            &mut config.providers.anthropic,
        ] {
            api.api_key_env = "TRIAGE_LLM_TEST_NO_SUCH_VARIABLE".to_string();
        }
        let providers = build_providers(&config);
        assert_eq!(providers.len(), 4);
        assert!(providers.iter().all(|p| !p.is_available()));
        assert!(providers
            .iter()
            .all(|p| p.setup_hint().contains("TRIAGE_LLM_TEST_NO_SUCH_VARIABLE")));
    }

    #[test]
    fn default_parse_json_uses_local_strategies() {
        let config = RouterConfig::default();
        let providers = build_providers(&config);
        let value = providers[0]
            .parse_json("Here you go:\n```json\n{\"severity\": \"high\"}\n```")
            .expect("fenced block parses");
        assert_eq!(value["severity"], "high");
    }
}
