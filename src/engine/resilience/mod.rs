//! Resilience wrapper
//!
//! Every integration gets one [`IntegrationGuard`] for the lifetime of the
//! process: a rate limiter, a circuit breaker and a per-call timeout. Guards
//! are not shared across worker processes.

pub mod breaker;
pub mod limiter;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use breaker::{BreakerCall, BreakerConfig, BreakerState, CircuitBreaker};
pub use limiter::RateLimiter;

/// Limits applied to every capability of one integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationPolicy {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Minimum gap between call starts
    #[serde(default)]
    pub min_spacing_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_error_threshold_percent")]
    pub error_threshold_percent: f64,

    #[serde(default = "default_rolling_window_ms")]
    pub rolling_window_ms: u64,

    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,

    /// Calls required in the window before the error rate is evaluated
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: usize,
}

fn default_max_concurrent() -> usize {
    8
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_error_threshold_percent() -> f64 {
    50.0
}

fn default_rolling_window_ms() -> u64 {
    10_000
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_minimum_calls() -> usize {
    5
}

impl Default for IntegrationPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            min_spacing_ms: 0,
            timeout_ms: default_timeout_ms(),
            error_threshold_percent: default_error_threshold_percent(),
            rolling_window_ms: default_rolling_window_ms(),
            reset_timeout_ms: default_reset_timeout_ms(),
            minimum_calls: default_minimum_calls(),
        }
    }
}

impl IntegrationPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            error_threshold_percent: self.error_threshold_percent,
            rolling_window: Duration::from_millis(self.rolling_window_ms),
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
            minimum_calls: self.minimum_calls,
        }
    }

    fn merged(&self, o: &PolicyOverride) -> Self {
        Self {
            max_concurrent: o.max_concurrent.unwrap_or(self.max_concurrent),
            min_spacing_ms: o.min_spacing_ms.unwrap_or(self.min_spacing_ms),
            timeout_ms: o.timeout_ms.unwrap_or(self.timeout_ms),
            error_threshold_percent: o
                .error_threshold_percent
                .unwrap_or(self.error_threshold_percent),
            rolling_window_ms: o.rolling_window_ms.unwrap_or(self.rolling_window_ms),
            reset_timeout_ms: o.reset_timeout_ms.unwrap_or(self.reset_timeout_ms),
            minimum_calls: o.minimum_calls.unwrap_or(self.minimum_calls),
        }
    }
}

/// Per-integration override; unset fields fall back to the defaults
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub max_concurrent: Option<usize>,
    pub min_spacing_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub error_threshold_percent: Option<f64>,
    pub rolling_window_ms: Option<u64>,
    pub reset_timeout_ms: Option<u64>,
    pub minimum_calls: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub defaults: IntegrationPolicy,

    #[serde(default)]
    pub integrations: HashMap<String, PolicyOverride>,
}

impl ResilienceConfig {
    pub fn policy_for(&self, integration: &str) -> IntegrationPolicy {
        match self.integrations.get(integration) {
            Some(o) => self.defaults.merged(o),
            None => self.defaults.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GuardError<E> {
    #[error("circuit breaker open")]
    BreakerOpen,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limiter closed")]
    LimiterClosed,

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
pub struct IntegrationGuard {
    name: String,
    policy: IntegrationPolicy,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl IntegrationGuard {
    pub fn new(name: impl Into<String>, policy: IntegrationPolicy) -> Self {
        let name = name.into();
        Self {
            limiter: RateLimiter::new(
                policy.max_concurrent,
                Duration::from_millis(policy.min_spacing_ms),
            ),
            breaker: CircuitBreaker::new(name.clone(), policy.breaker_config()),
            name,
            policy,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &IntegrationPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run `call` under the limiter, breaker and timeout. A timed-out call
    /// future is dropped and counts as a breaker failure.
    pub async fn call<F, T, E>(&self, call: F) -> Result<T, GuardError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if self.breaker.rejects() {
            return Err(GuardError::BreakerOpen);
        }

        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| GuardError::LimiterClosed)?;

        // The breaker may have opened while this call was queued
        let ticket = self.breaker.try_acquire().ok_or(GuardError::BreakerOpen)?;

        let timeout = self.policy.timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => {
                ticket.success();
                Ok(value)
            }
            Ok(Err(e)) => {
                ticket.failure();
                Err(GuardError::Inner(e))
            }
            Err(_) => {
                warn!(integration = %self.name, timeout_ms = self.policy.timeout_ms, "Call timed out");
                ticket.failure();
                Err(GuardError::Timeout(timeout))
            }
        }
    }
}

/// Point-in-time view of one integration guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationStatus {
    pub integration: String,
    pub state: BreakerState,
    pub error_rate_percent: f64,
    pub in_flight: usize,
    pub waiting: usize,
}

/// Process-wide registry of integration guards
#[derive(Debug, Default)]
pub struct Resilience {
    config: ResilienceConfig,
    guards: DashMap<String, Arc<IntegrationGuard>>,
}

impl Resilience {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            guards: DashMap::new(),
        }
    }

    /// Guard for an integration, created on first use
    pub fn guard(&self, integration: &str) -> Arc<IntegrationGuard> {
        if let Some(guard) = self.guards.get(integration) {
            return guard.clone();
        }
        self.guards
            .entry(integration.to_string())
            .or_insert_with(|| {
                Arc::new(IntegrationGuard::new(
                    integration,
                    self.config.policy_for(integration),
                ))
            })
            .clone()
    }

    pub fn snapshot(&self) -> Vec<IntegrationStatus> {
        let mut statuses: Vec<_> = self
            .guards
            .iter()
            .map(|entry| {
                let guard = entry.value();
                IntegrationStatus {
                    integration: guard.name.clone(),
                    state: guard.breaker.state(),
                    error_rate_percent: guard.breaker.error_rate(),
                    in_flight: guard.limiter.in_flight(),
                    waiting: guard.limiter.waiting(),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.integration.cmp(&b.integration));
        statuses
    }

    /// Integrations whose breaker is not closed
    pub fn degraded(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.state != BreakerState::Closed)
            .map(|s| s.integration)
            .collect()
    }
}
