//! Router and provider configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`TRIAGE_LLM_*`)
//! 2. Values from a TOML file ([`RouterConfig::from_toml_file`])
//! 3. Built-in defaults
//!
//! API credentials are never stored here. Each HTTP provider config names
//! the environment variable holding its key; the variable is read once when
//! the provider is constructed.
//!
//! ## Tunables
//!
//! | Setting                    | Default | Env override                       |
//! |----------------------------|---------|------------------------------------|
//! | per-call timeout           | 60 s    | `TRIAGE_LLM_TIMEOUT_SECS`          |
//! | JSON correction timeout    | 15 s    | `TRIAGE_LLM_CORRECTION_TIMEOUT_SECS` |
//! | retries                    | 3       | `TRIAGE_LLM_MAX_RETRIES`           |
//! | initial backoff            | 1000 ms | `TRIAGE_LLM_RETRY_DELAY_MS`        |
//! | backoff multiplier         | 2.0     | `TRIAGE_LLM_RETRY_MULTIPLIER`      |
//! | breaker threshold          | 5       | `TRIAGE_LLM_BREAKER_THRESHOLD`     |
//! | breaker cooldown           | 60 s    | `TRIAGE_LLM_BREAKER_COOLDOWN_SECS` |
//! | max output tokens          | 2000    | `TRIAGE_LLM_MAX_TOKENS`            |
//! | temperature                | 0.3     | `TRIAGE_LLM_TEMPERATURE`           |
//! | local provider first       | true    | `TRIAGE_LLM_PREFER_LOCAL`          |
//! | fallback wall-clock budget | none    | `TRIAGE_LLM_FALLBACK_BUDGET_SECS`  |

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use triage_resilience::{BreakerConfig, RetryPolicy};

const ENV_TIMEOUT_SECS: &str = "TRIAGE_LLM_TIMEOUT_SECS";
const ENV_CORRECTION_TIMEOUT_SECS: &str = "TRIAGE_LLM_CORRECTION_TIMEOUT_SECS";
const ENV_MAX_RETRIES: &str = "TRIAGE_LLM_MAX_RETRIES";
const ENV_RETRY_DELAY_MS: &str = "TRIAGE_LLM_RETRY_DELAY_MS";
const ENV_RETRY_MULTIPLIER: &str = "TRIAGE_LLM_RETRY_MULTIPLIER";
const ENV_BREAKER_THRESHOLD: &str = "TRIAGE_LLM_BREAKER_THRESHOLD";
const ENV_BREAKER_COOLDOWN_SECS: &str = "TRIAGE_LLM_BREAKER_COOLDOWN_SECS";
const ENV_MAX_TOKENS: &str = "TRIAGE_LLM_MAX_TOKENS";
const ENV_TEMPERATURE: &str = "TRIAGE_LLM_TEMPERATURE";
const ENV_PREFER_LOCAL: &str = "TRIAGE_LLM_PREFER_LOCAL";
const ENV_FALLBACK_BUDGET_SECS: &str = "TRIAGE_LLM_FALLBACK_BUDGET_SECS";
const ENV_OLLAMA_MODEL: &str = "TRIAGE_LLM_OLLAMA_MODEL";
const ENV_OLLAMA_BINARY: &str = "TRIAGE_LLM_OLLAMA_BINARY";

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Retry/backoff tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Circuit breaker tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
        }
    }
}

impl BreakerSettings {
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
        }
    }
}

/// Sampling settings sent with every HTTP request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Cap on generated tokens per call.
    pub max_tokens: u32,
    /// Fixed sampling temperature.
    pub temperature: f64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 2_000,
            temperature: 0.3,
        }
    }
}

/// Local-process (Ollama CLI) provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalProviderConfig {
    pub enabled: bool,
    pub model: String,
    /// Explicit executable path; skips the `PATH` search when set.
    pub binary: Option<PathBuf>,
}

impl Default for LocalProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "llama3".to_string(),
            binary: None,
        }
    }
}

/// One HTTP-API provider's settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

fn default_true() -> bool {
    true
}

impl ApiProviderConfig {
    fn new(model: &str, base_url: &str, api_key_env: &str) -> Self {
        Self {
            enabled: true,
            model: model.to_string(),
            base_url: base_url.to_string(),
            api_key_env: api_key_env.to_string(),
        }
    }

    pub fn gemini() -> Self {
        Self::new(
            "gemini-2.0-flash",
            "https://generativelanguage.googleapis.com/v1beta",
            "GOOGLE_API_KEY",
        )
    }

    pub fn openrouter() -> Self {
        Self::new(
            "openrouter/free",
            "https://openrouter.ai/api/v1",
            "OPENROUTER_API_KEY",
        )
    }

    pub fn huggingface() -> Self {
        Self::new(
            "mistralai/Mistral-7B-Instruct-v0.2",
            "https://api-inference.huggingface.co/models",
            "HUGGINGFACE_API_KEY",
        )
    }

    pub fn anthropic() -> Self {
        Self::new(
            "claude-3-5-haiku-20241022",
            "https://api.anthropic.com/v1",
            "ANTHROPIC_API_KEY",
        )
    }

    /// Read the credential from the environment; empty values count as absent.
    pub fn read_api_key(&self) -> Option<String> {
        env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// A `[providers.<name>]` table; absent keys keep that provider's defaults.
#[derive(Debug, Deserialize)]
struct ApiProviderTable {
    enabled: Option<bool>,
    model: Option<String>,
    base_url: Option<String>,
    api_key_env: Option<String>,
}

impl ApiProviderTable {
    fn over(self, base: ApiProviderConfig) -> ApiProviderConfig {
        ApiProviderConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            model: self.model.unwrap_or(base.model),
            base_url: self.base_url.unwrap_or(base.base_url),
            api_key_env: self.api_key_env.unwrap_or(base.api_key_env),
        }
    }
}

macro_rules! provider_table {
    ($fn_name:ident, $defaults:path) => {
        fn $fn_name<'de, D: Deserializer<'de>>(d: D) -> Result<ApiProviderConfig, D::Error> {
            ApiProviderTable::deserialize(d).map(|table| table.over($defaults()))
        }
    };
}

provider_table!(gemini_table, ApiProviderConfig::gemini);
provider_table!(openrouter_table, ApiProviderConfig::openrouter);
provider_table!(huggingface_table, ApiProviderConfig::huggingface);
provider_table!(anthropic_table, ApiProviderConfig::anthropic);

/// Settings for every HTTP provider, one table each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiProvidersConfig {
    #[serde(deserialize_with = "gemini_table")]
    pub gemini: ApiProviderConfig,
    #[serde(deserialize_with = "openrouter_table")]
    pub openrouter: ApiProviderConfig,
    #[serde(deserialize_with = "huggingface_table")]
    pub huggingface: ApiProviderConfig,
    #[serde(deserialize_with = "anthropic_table")]
    pub anthropic: ApiProviderConfig,
}

impl Default for ApiProvidersConfig {
    fn default() -> Self {
        Self {
            gemini: ApiProviderConfig::gemini(),
            openrouter: ApiProviderConfig::openrouter(),
            huggingface: ApiProviderConfig::huggingface(),
            anthropic: ApiProviderConfig::anthropic(),
        }
    }
}

/// Top-level configuration consumed by [`crate::router::Router::from_config`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Per-attempt timeout for a provider call.
    pub timeout_secs: u64,
    /// Timeout for the single JSON correction round-trip.
    pub correction_timeout_secs: u64,
    /// Put the local provider first (true) or last (false).
    pub prefer_local: bool,
    /// Optional cap on the wall-clock time of one fallback sequence.
    pub fallback_budget_secs: Option<u64>,
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub generation: GenerationSettings,
    pub local: LocalProviderConfig,
    pub providers: ApiProvidersConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            correction_timeout_secs: 15,
            prefer_local: true,
            fallback_budget_secs: None,
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            generation: GenerationSettings::default(),
            local: LocalProviderConfig::default(),
            providers: ApiProvidersConfig::default(),
        }
    }
}

impl RouterConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok(cfg)
    }

    /// Parse TOML, then apply environment overrides and validate.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.apply_env_overrides()?;
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok(cfg)
    }

    /// Overlay any `TRIAGE_LLM_*` variables that are set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| env::var(var).ok())
    }

    /// Overlay values from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let get = |var: &'static str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_TIMEOUT_SECS) {
            self.timeout_secs = parse_env(ENV_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(ENV_CORRECTION_TIMEOUT_SECS) {
            self.correction_timeout_secs = parse_env(ENV_CORRECTION_TIMEOUT_SECS, &v)?;
        }
        if let Some(v) = get(ENV_MAX_RETRIES) {
            self.retry.max_retries = parse_env(ENV_MAX_RETRIES, &v)?;
        }
        if let Some(v) = get(ENV_RETRY_DELAY_MS) {
            self.retry.initial_delay_ms = parse_env(ENV_RETRY_DELAY_MS, &v)?;
        }
        if let Some(v) = get(ENV_RETRY_MULTIPLIER) {
            self.retry.multiplier = parse_env(ENV_RETRY_MULTIPLIER, &v)?;
        }
        if let Some(v) = get(ENV_BREAKER_THRESHOLD) {
            self.breaker.failure_threshold = parse_env(ENV_BREAKER_THRESHOLD, &v)?;
        }
        if let Some(v) = get(ENV_BREAKER_COOLDOWN_SECS) {
            self.breaker.cooldown_secs = parse_env(ENV_BREAKER_COOLDOWN_SECS, &v)?;
        }
        if let Some(v) = get(ENV_MAX_TOKENS) {
            self.generation.max_tokens = parse_env(ENV_MAX_TOKENS, &v)?;
        }
        if let Some(v) = get(ENV_TEMPERATURE) {
            self.generation.temperature = parse_env(ENV_TEMPERATURE, &v)?;
        }
        if let Some(v) = get(ENV_PREFER_LOCAL) {
            self.prefer_local = parse_env(ENV_PREFER_LOCAL, &v)?;
        }
        if let Some(v) = get(ENV_FALLBACK_BUDGET_SECS) {
            self.fallback_budget_secs = Some(parse_env(ENV_FALLBACK_BUDGET_SECS, &v)?);
        }
        if let Some(v) = get(ENV_OLLAMA_MODEL) {
            self.local.model = v;
        }
        if let Some(v) = get(ENV_OLLAMA_BINARY) {
            self.local.binary = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Validate all settings; return an error string if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be > 0".to_string());
        }
        if self.correction_timeout_secs == 0 {
            return Err("correction_timeout_secs must be > 0".to_string());
        }
        if self.fallback_budget_secs == Some(0) {
            return Err("fallback_budget_secs must be > 0 when set".to_string());
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err("breaker.failure_threshold must be > 0".to_string());
        }
        if self.generation.max_tokens == 0 {
            return Err("generation.max_tokens must be > 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(format!(
                "generation.temperature must be in [0, 2], got {}",
                self.generation.temperature
            ));
        }
        if self.local.enabled && self.local.model.trim().is_empty() {
            return Err("local.model must not be empty".to_string());
        }
        for (name, api) in [
            ("gemini", &self.providers.gemini),
            ("openrouter", &self.providers.openrouter),
            ("huggingface", &self.providers.huggingface),
            ("anthropic", &self.providers.anthropic),
        ] {
            if !api.enabled {
                continue;
            }
            if api.model.trim().is_empty() {
                return Err(format!("providers.{name}.model must not be empty"));
            }
            if !(api.base_url.starts_with("http://") || api.base_url.starts_with("https://")) {
                return Err(format!(
                    "providers.{name}.base_url must be an http(s) URL, got {:?}",
                    api.base_url
                ));
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn correction_timeout(&self) -> Duration {
        Duration::from_secs(self.correction_timeout_secs)
    }

    pub fn fallback_budget(&self) -> Option<Duration> {
        self.fallback_budget_secs.map(Duration::from_secs)
    }
}

fn parse_env<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}
