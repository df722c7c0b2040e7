//! Per-provider circuit breaker.
//!
//! The breaker counts consecutive failed provider calls. Once the count
//! reaches `failure_threshold` the circuit *opens* and the router skips the
//! provider. When more than `cooldown` has elapsed since the last failure the
//! circuit is *half-open*: one probe is let through and its outcome either
//! closes the circuit again (`record_success`) or re-opens it with a fresh
//! timestamp (`record_failure`).
//!
//! ```text
//! Closed --(threshold failures)--> Open --(cooldown elapsed)--> HalfOpen
//!   ^                                                            |   |
//!   +---------------------------(success)------------------------+   |
//!                                  Open <-----------(failure)--------+
//! ```
//!
//! Success is a full reset, not a decrement: a provider that fails once and
//! then recovers starts from zero again.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Default consecutive failures before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default cooldown before an open circuit admits a probe.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Circuit breaker state for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy, calls allowed.
    Closed,
    /// Tripped, calls refused until the cooldown expires.
    Open,
    /// Cooldown expired, one probe call allowed.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Thresholds shared by every breaker a router creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time after the last failure before Open becomes HalfOpen.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Consecutive-failure circuit breaker for one provider.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    failure_count: u32,
    last_failure: Option<Instant>,
    open: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            failure_count: 0,
            last_failure: None,
            open: false,
        }
    }

    /// Record a failed call; may trip the circuit to Open.
    pub fn record_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(Instant::now());
        if self.failure_count >= self.config.failure_threshold {
            if !self.open {
                tracing::warn!(
                    failures = self.failure_count,
                    cooldown_secs = self.config.cooldown.as_secs(),
                    "circuit breaker opened"
                );
            }
            self.open = true;
        }
    }

    /// Record a successful call; resets the circuit to Closed.
    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.open = false;
        self.last_failure = None;
    }

    /// Whether a call may be attempted right now (Closed or HalfOpen).
    pub fn can_attempt(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    /// Current state of the circuit.
    pub fn state(&self) -> CircuitState {
        if !self.open {
            return CircuitState::Closed;
        }
        match self.last_failure {
            Some(last) if last.elapsed() > self.config.cooldown => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    /// Raw open flag; stays set through the half-open window.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Consecutive failures since the last success.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Time since the most recent failure, if any.
    pub fn since_last_failure(&self) -> Option<Duration> {
        self.last_failure.map(|t| t.elapsed())
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.record_success();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
