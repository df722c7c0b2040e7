//! Provider router with sticky selection, per-provider breakers and retry.
//!
//! ## Call flow
//!
//! 1. If a sticky provider is set (the last one that succeeded), it is
//!    available, and its breaker admits a call, try it first.
//! 2. Walk the ordered provider list. Unavailable and breaker-refused
//!    providers are skipped and noted; the sticky provider is not tried twice.
//!    The first success becomes the new sticky provider. A failure never
//!    clears it.
//! 3. If nothing succeeded, return one [`LlmError::Exhausted`] that lists
//!    every provider with why it was skipped or how it failed.
//!
//! Each provider attempt runs through the [`RetryPolicy`]; a whole retry
//! sequence counts as one call in the provider's stats and breaker.
//!
//! ## Concurrency
//!
//! Calls are serialized by an async gate held for the whole fallback
//! sequence. Stats and the sticky pointer sit behind short synchronous locks
//! that are never held across an `.await`, so diagnostics can be read while a
//! call is in flight.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use triage_resilience::{
    BreakerConfig, ErrorKind, FailureReason, FallbackReport, LlmError, ProviderFailure,
    ProviderStats, ProviderStatsSnapshot, Retried, RetryPolicy,
};

use crate::config::RouterConfig;
use crate::providers::{build_providers, Provider};
use crate::repair::{self, Completion, DEFAULT_CORRECTION_TIMEOUT};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Router tunables that are not provider-specific.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterOptions {
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub timeout: Duration,
    pub correction_timeout: Duration,
    /// Stop starting new providers once this much time has passed.
    pub fallback_budget: Option<Duration>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            timeout: DEFAULT_TIMEOUT,
            correction_timeout: DEFAULT_CORRECTION_TIMEOUT,
            fallback_budget: None,
        }
    }
}

impl RouterOptions {
    pub fn from_config(config: &RouterConfig) -> Self {
        Self {
            retry: config.retry.policy(),
            breaker: config.breaker.breaker_config(),
            timeout: config.timeout(),
            correction_timeout: config.correction_timeout(),
            fallback_budget: config.fallback_budget(),
        }
    }
}

struct ProviderSlot {
    provider: Box<dyn Provider>,
    stats: Mutex<ProviderStats>,
}

impl ProviderSlot {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn stats(&self) -> MutexGuard<'_, ProviderStats> {
        lock(&self.stats)
    }

    fn can_attempt(&self) -> bool {
        self.stats().can_attempt()
    }
}

/// Routes prompts across an ordered list of providers.
pub struct Router {
    slots: Vec<ProviderSlot>,
    sticky: Mutex<Option<usize>>,
    call_gate: tokio::sync::Mutex<()>,
    options: RouterOptions,
}

impl Router {
    /// Route over `providers` in the given order.
    pub fn new(providers: Vec<Box<dyn Provider>>, options: RouterOptions) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                provider,
                stats: Mutex::new(ProviderStats::new(options.breaker)),
            })
            .collect();
        Self {
            slots,
            sticky: Mutex::new(None),
            call_gate: tokio::sync::Mutex::new(()),
            options,
        }
    }

    /// Build every configured provider and route over them.
    pub fn from_config(config: &RouterConfig) -> Result<Self, LlmError> {
        config.validate().map_err(LlmError::Configuration)?;
        let router = Self::new(build_providers(config), RouterOptions::from_config(config));
        info!(
            providers = ?router.provider_names(),
            available = ?router.get_available_providers(),
            "router initialized"
        );
        Ok(router)
    }

    pub fn options(&self) -> &RouterOptions {
        &self.options
    }

    /// Route `prompt` with the default per-attempt timeout.
    pub async fn call(&self, prompt: &str) -> Result<String, LlmError> {
        self.call_with_timeout(prompt, self.options.timeout).await
    }

    /// Route `prompt`, giving each attempt `timeout`.
    pub async fn call_with_timeout(&self, prompt: &str, timeout: Duration) -> Result<String, LlmError> {
        let _gate = self.call_gate.lock().await;
        let started = Instant::now();
        let mut failures = Vec::new();
        let mut tried = None;

        if let Some(idx) = self.sticky_index() {
            let slot = &self.slots[idx];
            if slot.provider.is_available() && slot.can_attempt() {
                tried = Some(idx);
                debug!(provider = slot.name(), "trying sticky provider");
                match self.attempt(slot, prompt, timeout).await {
                    Ok(text) => return Ok(text),
                    Err(err) => failures.push(ProviderFailure::failed(slot.name(), &err)),
                }
            }
        }

        for (idx, slot) in self.slots.iter().enumerate() {
            if tried == Some(idx) {
                continue;
            }
            let name = slot.name();

            if !slot.provider.is_available() {
                debug!(provider = name, "skipping unavailable provider");
                failures.push(ProviderFailure::new(name, FailureReason::NotAvailable));
                continue;
            }
            if !slot.can_attempt() {
                debug!(provider = name, "skipping provider with open circuit");
                failures.push(ProviderFailure::new(name, FailureReason::CircuitOpen));
                continue;
            }
            if let Some(budget) = self.options.fallback_budget {
                if started.elapsed() >= budget {
                    warn!(provider = name, budget_secs = budget.as_secs(), "fallback budget exhausted");
                    failures.push(ProviderFailure::new(name, FailureReason::BudgetExhausted));
                    continue;
                }
            }

            match self.attempt(slot, prompt, timeout).await {
                Ok(text) => {
                    self.set_sticky(Some(idx));
                    return Ok(text);
                }
                Err(err) => failures.push(ProviderFailure::failed(name, &err)),
            }
        }

        let report = self.report(failures);
        warn!(kind = %report.kind(), providers = self.slots.len(), "no provider produced a response");
        Err(LlmError::Exhausted(report))
    }

    /// One provider, full retry sequence, stats updated once.
    async fn attempt(&self, slot: &ProviderSlot, prompt: &str, timeout: Duration) -> Result<String, LlmError> {
        let name = slot.name();
        let provider = slot.provider.as_ref();

        let outcome = self
            .options
            .retry
            .run(name, || async move {
                let start = Instant::now();
                provider
                    .call(prompt, timeout)
                    .await
                    .map(|text| (text, start.elapsed()))
            })
            .await;

        match outcome {
            Ok(Retried {
                value: (text, latency),
                attempts,
            }) => {
                slot.stats().record_success(latency);
                info!(
                    provider = name,
                    model = provider.model(),
                    attempts,
                    latency_ms = latency.as_millis() as u64,
                    "provider call succeeded"
                );
                Ok(text)
            }
            // A precondition failure says nothing about the backend's health.
            Err(err) if err.kind() == ErrorKind::Unavailable => {
                debug!(provider = name, error = %err, "provider became unavailable");
                Err(err)
            }
            Err(err) => {
                slot.stats().record_failure();
                warn!(provider = name, kind = %err.kind(), error = %err, "provider call failed");
                Err(err)
            }
        }
    }

    fn report(&self, failures: Vec<ProviderFailure>) -> FallbackReport {
        let hints = failures
            .iter()
            .filter(|f| f.reason == FailureReason::NotAvailable)
            .filter_map(|f| self.slots.iter().find(|s| s.name() == f.provider))
            .map(|s| s.provider.setup_hint().to_string())
            .collect();
        FallbackReport::new(failures, hints)
    }

    fn sticky_index(&self) -> Option<usize> {
        *lock(&self.sticky)
    }

    fn set_sticky(&self, idx: Option<usize>) {
        let mut sticky = lock(&self.sticky);
        if *sticky != idx {
            debug!(
                from = ?sticky.map(|i| self.slots[i].name()),
                to = ?idx.map(|i| self.slots[i].name()),
                "sticky provider changed"
            );
        }
        *sticky = idx;
    }

    /// Names of providers that are configured and whose breaker admits a call.
    pub fn get_available_providers(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|s| s.provider.is_available() && s.can_attempt())
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn has_available_provider(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.provider.is_available() && s.can_attempt())
    }

    /// Per-provider counters and breaker state, in routing order.
    pub fn get_provider_stats(&self) -> Vec<ProviderStatsSnapshot> {
        self.slots
            .iter()
            .map(|s| {
                s.stats()
                    .snapshot(s.name(), s.provider.model(), s.provider.is_available())
            })
            .collect()
    }

    /// The provider tried first on the next call, if any.
    pub fn sticky_provider(&self) -> Option<String> {
        self.sticky_index().map(|i| self.slots[i].name().to_string())
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name().to_string()).collect()
    }

    /// Clear the sticky provider and all stats and breakers.
    pub fn reset(&self) {
        self.set_sticky(None);
        for slot in &self.slots {
            slot.stats().reset();
        }
    }

    /// Parse model output as JSON, spending at most one correction call.
    pub async fn safe_json_parse(&self, raw: &str) -> Result<Value, LlmError> {
        let local = match self.sticky_index() {
            Some(idx) => self.slots[idx].provider.parse_json(raw),
            None => repair::extract_json(raw),
        };
        match local {
            Ok(value) => Ok(value),
            Err(_) => repair::repair_json(self, raw, self.options.correction_timeout).await,
        }
    }

    /// [`Router::safe_json_parse`] followed by typed deserialization.
    pub async fn safe_json_parse_as<T: DeserializeOwned>(&self, raw: &str) -> Result<T, LlmError> {
        let value = self.safe_json_parse(raw).await?;
        serde_json::from_value(value).map_err(|e| {
            debug!(error = %e, "JSON did not match the expected shape");
            LlmError::parse(raw)
        })
    }
}

#[async_trait]
impl Completion for Router {
    async fn complete(&self, prompt: &str, timeout: Duration) -> Result<String, LlmError> {
        self.call_with_timeout(prompt, timeout).await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
