//! Retry policy for one logical provider call.
//!
//! A call is attempted up to `max_retries + 1` times. Between attempts the
//! policy sleeps `initial_delay * multiplier^n`. Only [`LlmError::is_retriable`]
//! errors (timeouts, bad responses, transport failures) consume the budget;
//! anything else, rate limits in particular, is returned immediately because
//! a short backoff will not clear it.
//!
//! The circuit breaker is not consulted here. The router checks it once
//! before handing the provider to the policy.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LlmError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
    /// Factor applied to the wait after every failed retry.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

/// A value produced by a retried operation plus how many attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts including the first one.
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let secs = self.initial_delay.as_secs_f64() * factor;
        if secs.is_finite() && secs >= 0.0 {
            Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }

    /// Run `op` until it succeeds, returns a terminal error, or the budget is spent.
    ///
    /// On exhaustion the result is a single [`LlmError::RetriesExhausted`]
    /// wrapping the last underlying cause.
    pub async fn run<T, F, Fut>(&self, provider: &str, mut op: F) -> Result<Retried<T>, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let total = self.total_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    })
                }
                Err(err) if !err.is_retriable() => {
                    debug!(provider, attempt, kind = %err.kind(), "terminal error, not retrying");
                    return Err(err);
                }
                Err(err) if attempt >= total => {
                    warn!(provider, attempts = attempt, error = %err, "retries exhausted");
                    return Err(LlmError::RetriesExhausted {
                        provider: provider.to_string(),
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn default_policy_allows_four_attempts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.total_attempts(), 4);
    }

    #[test]
    fn delays_grow_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn custom_multiplier() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(100),
            multiplier: 3.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(900));
    }

    #[test]
    fn huge_exponent_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(10_000), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();
        let out = RetryPolicy::default()
            .run("gemini", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(LlmError::response("gemini", "HTTP 503"))
                } else {
                    Ok("done")
                }
            })
            .await
            .expect("third attempt succeeds");

        assert_eq!(out.value, "done");
        assert_eq!(out.attempts, 3);
        // 1s + 2s of backoff before the third attempt.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_wraps_last_cause() {
        let calls = &AtomicU32::new(0);
        let start = Instant::now();
        let err = RetryPolicy::default()
            .run("ollama", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(LlmError::timeout("ollama", Duration::from_secs(60)))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // No sleep after the final attempt.
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        match err {
            LlmError::RetriesExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, LlmError::Timeout { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_not_retried() {
        let calls = &AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("openrouter", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(LlmError::rate_limit("openrouter", None))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, LlmError::RateLimit { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_after_retry_stops_immediately() {
        let calls = &AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("gemini", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err::<(), _>(LlmError::response("gemini", "HTTP 500"))
                } else {
                    Err(LlmError::rate_limit("gemini", None))
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(err, LlmError::RateLimit { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_fails_fast() {
        let calls = &AtomicU32::new(0);
        let err = RetryPolicy::default()
            .run("ollama", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(LlmError::unavailable("ollama", "binary not found"))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, LlmError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn no_retry_policy_makes_one_attempt() {
        let calls = &AtomicU32::new(0);
        let err = RetryPolicy::no_retry()
            .run("gemini", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(LlmError::response("gemini", "bad"))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 1, .. }));
    }
}
