//! Per-integration rate limiter
//!
//! Bounds in-flight calls and enforces a minimum spacing between call
//! starts. Waiters are admitted in FIFO order (both the semaphore and the
//! spacing mutex are fair).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    min_spacing: Duration,
    next_start: Mutex<Option<Instant>>,
    waiting: AtomicUsize,
}

/// Held for the duration of one admitted call
#[derive(Debug)]
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_spacing: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            min_spacing,
            next_start: Mutex::new(None),
            waiting: AtomicUsize::new(0),
        }
    }

    pub async fn acquire(&self) -> Result<LimiterPermit, AcquireError> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard(&self.waiting);

        let permit = self.permits.clone().acquire_owned().await?;

        if !self.min_spacing.is_zero() {
            let mut next_start = self.next_start.lock().await;
            if let Some(at) = *next_start {
                tokio::time::sleep_until(at).await;
            }
            *next_start = Some(Instant::now() + self.min_spacing);
        }

        Ok(LimiterPermit { _permit: permit })
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
