//! Enqueue options
//!
//! Mirrors the JSON shape accepted by the enqueue API:
//!
//! ```json
//! {
//!   "attempts": 3,
//!   "backoff": { "type": "exponential", "delay": 1000 },
//!   "repeat": { "pattern": "*/15 * * * *" },
//!   "priority": 1,
//!   "removeOnComplete": 100,
//!   "removeOnFail": { "age": 86400, "count": 500 }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay between job-level retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { delay: u64 },
    /// `delay * multiplier^(attempt - 1)`
    Exponential {
        delay: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
}

fn default_multiplier() -> f64 {
    2.0
}

impl Backoff {
    /// Delay before the retry that follows failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed { delay } => Duration::from_millis(*delay),
            Backoff::Exponential { delay, multiplier } => {
                let exponent = attempt.saturating_sub(1) as i32;
                let millis = *delay as f64 * multiplier.powi(exponent);
                Duration::from_millis(millis.min(u64::MAX as f64) as u64)
            }
        }
    }
}

/// Cron-style repetition; each tick creates a new job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repeat {
    pub pattern: String,
    /// Stop after this many repetitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// How long settled job records are kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Retention {
    /// `true` removes immediately, `false` keeps forever
    Flag(bool),
    /// Keep the latest N
    Count(u32),
    /// Keep for `age` seconds and/or at most `count` records
    Policy {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        age: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
    },
}

impl Default for Retention {
    fn default() -> Self {
        Retention::Flag(false)
    }
}

impl Retention {
    pub fn removes_immediately(&self) -> bool {
        matches!(self, Retention::Flag(true) | Retention::Count(0))
    }

    pub fn max_age(&self) -> Option<Duration> {
        match self {
            Retention::Policy { age: Some(age), .. } => Some(Duration::from_secs(*age)),
            _ => None,
        }
    }

    pub fn max_count(&self) -> Option<usize> {
        match self {
            Retention::Count(n) => Some(*n as usize),
            Retention::Policy { count: Some(n), .. } => Some(*n as usize),
            Retention::Flag(true) => Some(0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    /// Total attempts including the first
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Repeat>,

    /// Lower runs first
    #[serde(default)]
    pub priority: i32,

    /// Delay before the first attempt
    #[serde(default)]
    pub delay_ms: u64,

    #[serde(default)]
    pub remove_on_complete: Retention,

    #[serde(default)]
    pub remove_on_fail: Retention,
}

fn default_attempts() -> u32 {
    1
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff: None,
            repeat: None,
            priority: 0,
            delay_ms: 0,
            remove_on_complete: Retention::default(),
            remove_on_fail: Retention::default(),
        }
    }
}

impl JobOptions {
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn repeat(mut self, pattern: impl Into<String>) -> Self {
        self.repeat = Some(Repeat {
            pattern: pattern.into(),
            limit: None,
        });
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    /// Delay before retrying after failed attempt `attempt`
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.backoff
            .as_ref()
            .map(|b| b.delay_for(attempt))
            .unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exponential_backoff() {
        let backoff = Backoff::Exponential {
            delay: 100,
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));

        let fixed = Backoff::Fixed { delay: 250 };
        assert_eq!(fixed.delay_for(1), fixed.delay_for(5));
    }

    #[test]
    fn test_parse_wire_options() {
        let options: JobOptions = serde_json::from_value(json!({
            "attempts": 5,
            "backoff": { "type": "exponential", "delay": 1000, "multiplier": 3 },
            "repeat": { "pattern": "every 5 minutes" },
            "priority": -1,
            "removeOnComplete": true,
            "removeOnFail": { "age": 3600, "count": 10 }
        }))
        .unwrap();

        assert_eq!(options.attempts, 5);
        assert_eq!(options.retry_delay(3), Duration::from_millis(9000));
        assert_eq!(options.repeat.unwrap().pattern, "every 5 minutes");
        assert_eq!(options.priority, -1);
        assert!(options.remove_on_complete.removes_immediately());
        assert_eq!(
            options.remove_on_fail,
            Retention::Policy {
                age: Some(3600),
                count: Some(10)
            }
        );
        assert_eq!(options.remove_on_fail.max_age(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_defaults() {
        let options: JobOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, JobOptions::default());
        assert_eq!(options.attempts, 1);
        assert_eq!(options.retry_delay(1), Duration::ZERO);
        assert!(!options.remove_on_complete.removes_immediately());
        assert_eq!(options.remove_on_complete.max_count(), None);
    }

    #[test]
    fn test_retention_forms() {
        let keep_three: Retention = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(keep_three.max_count(), Some(3));

        let age_only: Retention = serde_json::from_value(json!({ "age": 60 })).unwrap();
        assert_eq!(age_only.max_count(), None);
        assert_eq!(age_only.max_age(), Some(Duration::from_secs(60)));
    }
}
