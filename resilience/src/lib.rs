//! Failure-handling state for the reasoning router.
//!
//! Deterministic building blocks with no network or process I/O:
//!
//! - [`error`]: provider error taxonomy and the aggregated fallback report
//! - [`breaker`]: per-provider consecutive-failure circuit breaker
//! - [`retry`]: exponential backoff policy for a single provider call
//! - [`stats`]: per-provider counters that own the breaker
//!
//! Time is read through `tokio::time::Instant`, so tests can pause and
//! advance the clock.

pub mod breaker;
pub mod error;
pub mod retry;
pub mod stats;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use error::{ErrorKind, FailureReason, FallbackReport, LlmError, ProviderFailure};
pub use retry::{Retried, RetryPolicy};
pub use stats::{ProviderStats, ProviderStatsSnapshot};
