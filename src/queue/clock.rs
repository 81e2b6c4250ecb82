//! Queue clock
//!
//! Wall-clock timestamps derived from tokio's monotonic clock: a UTC anchor
//! taken at construction plus the tokio time elapsed since. Under a paused
//! tokio runtime the queue clock follows virtual time, so `run_at`
//! scheduling, backoff and retention can be driven with
//! `tokio::time::advance`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// `at` moved forward by `delay`, or `None` past the representable range
pub fn after(at: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| at.checked_add_signed(delay))
}

#[derive(Debug, Clone, Copy)]
pub struct QueueClock {
    anchor_utc: DateTime<Utc>,
    anchor: Instant,
}

impl Default for QueueClock {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueClock {
    pub fn new() -> Self {
        Self {
            anchor_utc: Utc::now(),
            anchor: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed()).unwrap_or_default();
        self.anchor_utc + elapsed
    }

    /// Tokio instant at which `at` is reached, for sleeping until a job is due
    pub fn instant_at(&self, at: DateTime<Utc>) -> Instant {
        let offset = (at - self.anchor_utc).to_std().unwrap_or_default();
        self.anchor + offset
    }
}
