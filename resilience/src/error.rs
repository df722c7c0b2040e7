//! Provider error taxonomy with retry classification.
//!
//! Every failure a provider call can produce is represented here, already
//! tagged with the provider name. Callers query [`LlmError::kind`] or
//! [`LlmError::is_retriable`] instead of matching on message text.
//!
//! ## Kinds
//!
//! | Kind          | Retried by the policy | Falls back to next provider |
//! |---------------|-----------------------|-----------------------------|
//! | Timeout       | yes                   | yes                         |
//! | Response      | yes                   | yes                         |
//! | RateLimit     | no                    | yes                         |
//! | Unavailable   | no                    | yes (never attempted)       |
//! | Parse         | no                    | n/a                         |
//! | Configuration | no                    | n/a                         |

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Number of characters of an unparseable response kept for diagnostics.
pub const PARSE_PREVIEW_CHARS: usize = 200;

/// Coarse classification used by the retry policy and the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Precondition failed (missing credential or binary); never attempted.
    Unavailable,
    /// The attempt exceeded its deadline.
    Timeout,
    /// Backend reachable but returned a non-success status or bad envelope.
    Response,
    /// Backend explicitly signalled throttling.
    RateLimit,
    /// Structured-output repair exhausted every strategy.
    Parse,
    /// Invalid router or provider configuration.
    Configuration,
}

impl ErrorKind {
    /// Whether another attempt against the same provider may succeed.
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Timeout | Self::Response)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Timeout => write!(f, "timeout"),
            Self::Response => write!(f, "response_error"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Parse => write!(f, "parse_error"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Unified error type for provider calls, routing and JSON repair.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} is not available: {reason}")]
    Unavailable { provider: String, reason: String },

    #[error("{provider} timed out after {}s", .timeout.as_secs_f64())]
    Timeout { provider: String, timeout: Duration },

    #[error("invalid response from {provider}: {reason}")]
    Response { provider: String, reason: String },

    /// Transport-level failure (connection refused, DNS, broken pipe).
    #[error("{provider} request failed: {reason}")]
    Transport { provider: String, reason: String },

    #[error("rate limited by {provider}{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimit {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("failed to parse model output as JSON (response preview: {preview})")]
    Parse { preview: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every attempt against one provider failed with a retriable error.
    #[error("{provider} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last: Box<LlmError>,
    },

    /// Every provider was skipped or failed.
    #[error("{0}")]
    Exhausted(FallbackReport),
}

impl LlmError {
    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn response(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Response {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn transport(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(provider: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            provider: provider.into(),
            timeout,
        }
    }

    pub fn rate_limit(provider: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimit {
            provider: provider.into(),
            retry_after,
        }
    }

    /// Build a parse error keeping only a short, char-boundary-safe preview.
    pub fn parse(raw: &str) -> Self {
        let mut preview: String = raw.chars().take(PARSE_PREVIEW_CHARS).collect();
        if raw.chars().count() > PARSE_PREVIEW_CHARS {
            preview.push_str("...");
        }
        Self::Parse { preview }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Response { .. } | Self::Transport { .. } => ErrorKind::Response,
            Self::RateLimit { .. } => ErrorKind::RateLimit,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::RetriesExhausted { last, .. } => last.kind(),
            Self::Exhausted(report) => report.kind(),
        }
    }

    /// Returns `true` if the retry policy may attempt the same provider again.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } | Self::Exhausted(_) => false,
            other => other.kind().is_retriable(),
        }
    }
}

/// Why one provider contributed nothing to a routed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// `is_available()` was false; not attempted.
    NotAvailable,
    /// Breaker refused the attempt; not attempted.
    CircuitOpen,
    /// The optional fallback budget ran out before this provider's turn.
    BudgetExhausted,
    /// Attempted and failed.
    Failed { kind: ErrorKind, message: String },
}

impl FailureReason {
    /// Whether the provider was actually called.
    pub fn was_attempted(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable => write!(f, "not available"),
            Self::CircuitOpen => write!(f, "circuit breaker open"),
            Self::BudgetExhausted => write!(f, "skipped, fallback time budget exhausted"),
            Self::Failed {
                kind: ErrorKind::RateLimit,
                ..
            } => write!(f, "rate limited"),
            Self::Failed { message, .. } => write!(f, "{message}"),
        }
    }
}

/// One line of the aggregated fallback error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    #[serde(flatten)]
    pub reason: FailureReason,
}

impl ProviderFailure {
    pub fn new(provider: impl Into<String>, reason: FailureReason) -> Self {
        Self {
            provider: provider.into(),
            reason,
        }
    }

    /// Record a call that ended in `err`. A provider that reported itself
    /// unavailable from inside the call is listed as not available.
    pub fn failed(provider: impl Into<String>, err: &LlmError) -> Self {
        let reason = match err.kind() {
            ErrorKind::Unavailable => FailureReason::NotAvailable,
            kind => FailureReason::Failed {
                kind,
                message: err.to_string(),
            },
        };
        Self::new(provider, reason)
    }
}

/// Aggregated account of a routed call where every provider was exhausted.
///
/// This is the only failure surfaced to router callers; it names every
/// provider in the order it was considered plus the setup actions available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackReport {
    pub failures: Vec<ProviderFailure>,
    pub setup_hints: Vec<String>,
}

impl FallbackReport {
    pub fn new(failures: Vec<ProviderFailure>, setup_hints: Vec<String>) -> Self {
        Self {
            failures,
            setup_hints,
        }
    }

    /// True when no provider was actually called.
    pub fn nothing_attempted(&self) -> bool {
        !self.failures.iter().any(|f| f.reason.was_attempted())
    }

    /// Names of every provider listed in the report.
    pub fn provider_names(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.provider.as_str()).collect()
    }

    /// The most useful single kind for a caller deciding what to report.
    pub fn kind(&self) -> ErrorKind {
        let attempted: Vec<ErrorKind> = self
            .failures
            .iter()
            .filter_map(|f| match &f.reason {
                FailureReason::Failed { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();

        match attempted.last() {
            None => ErrorKind::Unavailable,
            Some(_) if attempted.iter().all(|k| *k == ErrorKind::RateLimit) => {
                ErrorKind::RateLimit
            }
            Some(last) => *last,
        }
    }
}

impl fmt::Display for FallbackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failures.is_empty() {
            write!(f, "no LLM provider configured")?;
        } else if self.nothing_attempted() {
            write!(f, "no LLM provider available, configure one of: ")?;
            write!(f, "{}", self.provider_names().join(", "))?;
        } else {
            write!(f, "all LLM providers failed")?;
        }

        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.provider, failure.reason)?;
        }

        if !self.setup_hints.is_empty() {
            write!(f, "\n\nSetup instructions:")?;
            for (i, hint) in self.setup_hints.iter().enumerate() {
                write!(f, "\n{}. {}", i + 1, hint)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_response_are_retriable() {
        assert!(LlmError::timeout("gemini", Duration::from_secs(60)).is_retriable());
        assert!(LlmError::response("gemini", "HTTP 500").is_retriable());
        assert!(LlmError::transport("gemini", "connection refused").is_retriable());
    }

    #[test]
    fn rate_limit_is_terminal() {
        let err = LlmError::rate_limit("openrouter", None);
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(!err.is_retriable());
        assert_eq!(err.to_string(), "rate limited by openrouter");
    }

    #[test]
    fn rate_limit_display_includes_retry_after() {
        let err = LlmError::rate_limit("gemini", Some(Duration::from_secs(30)));
        assert_eq!(err.to_string(), "rate limited by gemini (retry after 30s)");
    }

    #[test]
    fn retries_exhausted_inherits_kind_of_last_cause() {
        let err = LlmError::RetriesExhausted {
            provider: "ollama".into(),
            attempts: 4,
            last: Box::new(LlmError::timeout("ollama", Duration::from_secs(5))),
        };
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("after 4 attempts"));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn parse_preview_is_truncated() {
        let raw = "x".repeat(500);
        match LlmError::parse(&raw) {
            LlmError::Parse { preview } => {
                assert_eq!(preview.len(), PARSE_PREVIEW_CHARS + 3);
                assert!(preview.ends_with("..."));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_preview_respects_char_boundaries() {
        let raw = "é".repeat(300);
        let err = LlmError::parse(&raw);
        assert!(err.to_string().contains("éé"));
    }

    #[test]
    fn report_with_nothing_attempted_names_every_provider() {
        let report = FallbackReport::new(
            vec![
                ProviderFailure::new("ollama", FailureReason::NotAvailable),
                ProviderFailure::new("gemini", FailureReason::NotAvailable),
                ProviderFailure::new("openrouter", FailureReason::CircuitOpen),
            ],
            vec!["export GOOGLE_API_KEY=...".into()],
        );
        assert_eq!(report.kind(), ErrorKind::Unavailable);
        let msg = report.to_string();
        assert!(msg.starts_with("no LLM provider available, configure one of: ollama, gemini, openrouter"));
        assert!(msg.contains("openrouter: circuit breaker open"));
        assert!(msg.contains("1. export GOOGLE_API_KEY=..."));
    }

    #[test]
    fn report_kind_prefers_rate_limit_only_when_uniform() {
        let limited = FallbackReport::new(
            vec![
                ProviderFailure::failed("a", &LlmError::rate_limit("a", None)),
                ProviderFailure::failed("b", &LlmError::rate_limit("b", None)),
            ],
            vec![],
        );
        assert_eq!(limited.kind(), ErrorKind::RateLimit);
        assert!(limited.to_string().contains("a: rate limited"));

        let mixed = FallbackReport::new(
            vec![
                ProviderFailure::failed("a", &LlmError::rate_limit("a", None)),
                ProviderFailure::failed("b", &LlmError::timeout("b", Duration::from_secs(1))),
            ],
            vec![],
        );
        assert_eq!(mixed.kind(), ErrorKind::Timeout);
        assert!(mixed.to_string().starts_with("all LLM providers failed"));
    }
}
