//! Circuit breaker
//!
//! `Closed` tracks outcomes over a rolling window. Once the window holds at
//! least `minimum_calls` outcomes and the error rate reaches the threshold,
//! the breaker opens and fails fast. After `reset_timeout` it admits exactly
//! one trial call (`HalfOpen`): success closes it with cleared counters,
//! failure re-opens it and restarts the timer.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub error_threshold_percent: f64,
    pub rolling_window: Duration,
    pub reset_timeout: Duration,
    pub minimum_calls: usize,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    /// (finished at, succeeded)
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

/// Admission ticket for one call; must be settled with `success` or
/// `failure`. Dropping it unsettled counts as a failure.
#[derive(Debug)]
pub struct BreakerCall<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerCall<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record(self.trial, true);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record(self.trial, false);
    }
}

impl Drop for BreakerCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record(self.trial, false);
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state; an open breaker whose reset period elapsed reports
    /// `HalfOpen`
    pub fn state(&self) -> BreakerState {
        let inner = self.lock();
        match inner.state {
            BreakerState::Open if self.reset_elapsed(&inner) => BreakerState::HalfOpen,
            state => state,
        }
    }

    /// True when a call would be rejected right now
    pub fn rejects(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => !self.reset_elapsed(&inner),
            BreakerState::HalfOpen => inner.trial_in_flight,
        }
    }

    pub fn try_acquire(&self) -> Option<BreakerCall<'_>> {
        let mut inner = self.lock();
        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                if !self.reset_elapsed(&inner) {
                    return None;
                }
                info!(integration = %self.name, "Circuit breaker half-open, admitting trial call");
                inner.state = BreakerState::HalfOpen;
                inner.trial_in_flight = true;
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    return None;
                }
                inner.trial_in_flight = true;
                true
            }
        };

        Some(BreakerCall {
            breaker: self,
            trial,
            settled: false,
        })
    }

    /// Error rate over the current window, in percent
    pub fn error_rate(&self) -> f64 {
        let mut inner = self.lock();
        self.prune(&mut inner, Instant::now());
        Self::rate(&inner.outcomes)
    }

    fn record(&self, trial: bool, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();

        if trial {
            inner.trial_in_flight = false;
            if success {
                info!(integration = %self.name, "Circuit breaker closed after successful trial");
                inner.state = BreakerState::Closed;
                inner.outcomes.clear();
                inner.opened_at = None;
            } else {
                warn!(integration = %self.name, "Trial call failed, circuit breaker re-opened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
            }
            return;
        }

        // Late result from a call admitted before the breaker opened
        if inner.state != BreakerState::Closed {
            return;
        }

        inner.outcomes.push_back((now, success));
        self.prune(&mut inner, now);

        if inner.outcomes.len() >= self.config.minimum_calls.max(1) {
            let rate = Self::rate(&inner.outcomes);
            if rate >= self.config.error_threshold_percent {
                warn!(
                    integration = %self.name,
                    error_rate = rate,
                    calls = inner.outcomes.len(),
                    "Circuit breaker opened"
                );
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.outcomes.clear();
            }
        }
    }

    fn prune(&self, inner: &mut Inner, now: Instant) {
        while let Some(&(at, _)) = inner.outcomes.front() {
            if now.duration_since(at) > self.config.rolling_window {
                inner.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    fn reset_elapsed(&self, inner: &Inner) -> bool {
        inner
            .opened_at
            .is_some_and(|at| at.elapsed() >= self.config.reset_timeout)
    }

    fn rate(outcomes: &VecDeque<(Instant, bool)>) -> f64 {
        if outcomes.is_empty() {
            return 0.0;
        }
        let failures = outcomes.iter().filter(|(_, ok)| !ok).count();
        failures as f64 * 100.0 / outcomes.len() as f64
    }
}
