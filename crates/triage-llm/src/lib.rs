//! Resilient multi-provider LLM routing for incident triage.
//!
//! A [`Router`] sends a prompt to the first provider that can answer it:
//! a local model run through the Ollama CLI, or one of several HTTP APIs.
//! Failures are retried with exponential backoff, persistently failing
//! providers are isolated by a circuit breaker, and the last provider that
//! worked is tried first next time.
//!
//! Model output that should be JSON goes through [`Router::safe_json_parse`],
//! which tries local extraction before spending a single correction call.
//!
//! ```no_run
//! # async fn run() -> Result<(), triage_llm::LlmError> {
//! let config = triage_llm::RouterConfig::from_env()
//!     .map_err(|e| triage_llm::LlmError::Configuration(e.to_string()))?;
//! let router = triage_llm::Router::from_config(&config)?;
//! let raw = router.call("Summarize this alert as JSON: disk 98% on db-1").await?;
//! let summary = router.safe_json_parse(&raw).await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod providers;
pub mod repair;
pub mod router;
pub mod telemetry;

pub use config::{ConfigError, RouterConfig};
pub use providers::Provider;
pub use repair::{extract_json, Completion, MAX_CORRECTION_ROUNDS};
pub use router::{Router, RouterOptions};
pub use triage_resilience::{
    BreakerConfig, CircuitState, ErrorKind, FailureReason, FallbackReport, LlmError,
    ProviderFailure, ProviderStatsSnapshot, RetryPolicy,
};
