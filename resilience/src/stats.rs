//! Running per-provider counters plus the provider's circuit breaker.
//!
//! One logical provider call (a whole retry sequence) counts as one attempt.
//! Latency is accumulated for successful calls only, so the average reflects
//! how long a working provider takes to answer.

use std::time::Duration;

use serde::Serialize;

use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};

/// Counters and breaker for one provider.
#[derive(Debug, Clone)]
pub struct ProviderStats {
    attempts: u64,
    successes: u64,
    failures: u64,
    total_latency: Duration,
    breaker: CircuitBreaker,
}

impl ProviderStats {
    pub fn new(breaker: BreakerConfig) -> Self {
        Self {
            attempts: 0,
            successes: 0,
            failures: 0,
            total_latency: Duration::ZERO,
            breaker: CircuitBreaker::new(breaker),
        }
    }

    /// Record a successful call and close the breaker.
    pub fn record_success(&mut self, latency: Duration) {
        self.attempts += 1;
        self.successes += 1;
        self.total_latency = self.total_latency.saturating_add(latency);
        self.breaker.record_success();
    }

    /// Record a failed call; may open the breaker.
    pub fn record_failure(&mut self) {
        self.attempts += 1;
        self.failures += 1;
        self.breaker.record_failure();
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Successes over attempts (0.0 when nothing was attempted).
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    /// Mean latency of successful calls (zero when there were none).
    pub fn avg_latency(&self) -> Duration {
        if self.successes == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_latency.as_nanos() / u128::from(self.successes);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Whether the breaker currently admits a call.
    pub fn can_attempt(&self) -> bool {
        self.breaker.can_attempt()
    }

    /// Zero every counter and close the breaker.
    pub fn reset(&mut self) {
        *self = Self::new(self.breaker.config());
    }

    /// Read-only view for diagnostics.
    pub fn snapshot(&self, name: &str, model: &str, available: bool) -> ProviderStatsSnapshot {
        ProviderStatsSnapshot {
            name: name.to_string(),
            model: model.to_string(),
            available,
            total_calls: self.attempts,
            successful_calls: self.successes,
            failed_calls: self.failures,
            success_rate: self.success_rate(),
            avg_latency_ms: self.avg_latency().as_nanos() as f64 / 1_000_000.0,
            circuit_open: self.breaker.is_open(),
            circuit_state: self.breaker.state(),
            consecutive_failures: self.breaker.failure_count(),
        }
    }
}

impl Default for ProviderStats {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

/// Serializable per-provider report returned by the router's diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatsSnapshot {
    pub name: String,
    pub model: String,
    pub available: bool,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub circuit_open: bool,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
}
