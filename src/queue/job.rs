//! Job records
//!
//! A job wraps one workflow run. Its state moves `Waiting -> Active ->
//! {Completed | Failed}`; a retry puts it back to `Waiting` with a later
//! `run_at`. A waiting job whose `run_at` is in the future is reported as
//! delayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::options::JobOptions;
use crate::engine::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// What the job runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub workflow_id: String,
    #[serde(default)]
    pub trigger: Value,
}

/// Outcome of the last settled attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
}

/// New job as handed to a backend
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub queue: String,
    pub name: String,
    pub payload: JobPayload,
    pub options: JobOptions,
    pub run_at: DateTime<Utc>,
    /// Repetitions already produced by the job's repeat chain
    pub repeat_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub payload: JobPayload,
    pub options: JobOptions,
    pub state: JobState,
    /// Attempts started so far
    pub attempts_made: u32,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<JobSummary>,
    pub repeat_count: u32,
    /// Set on an active job; the worker stops the run at the next wave
    #[serde(default)]
    pub cancel_requested: bool,
}

impl JobRecord {
    pub fn from_new(job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: job.queue,
            name: job.name,
            payload: job.payload,
            options: job.options,
            state: JobState::Waiting,
            attempts_made: 0,
            run_at: job.run_at,
            created_at: now,
            finished_at: None,
            last_error: None,
            summary: None,
            repeat_count: job.repeat_count,
            cancel_requested: false,
        }
    }

    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.run_at > now
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.run_at <= now
    }

    /// Whether another attempt is allowed after the current one
    pub fn has_attempts_left(&self) -> bool {
        self.attempts_made < self.options.attempts
    }
}

/// Returned to the caller of `enqueue`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHandle {
    pub id: Uuid,
    pub queue: String,
    pub name: String,
    pub run_at: DateTime<Utc>,
}

impl From<&JobRecord> for JobHandle {
    fn from(job: &JobRecord) -> Self {
        Self {
            id: job.id,
            queue: job.queue.clone(),
            name: job.name.clone(),
            run_at: job.run_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.delayed + self.active + self.completed + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(run_at: DateTime<Utc>) -> JobRecord {
        JobRecord::from_new(
            NewJob {
                queue: "q".into(),
                name: "wf".into(),
                payload: JobPayload {
                    workflow_id: "wf".into(),
                    trigger: Value::Null,
                },
                options: JobOptions::default().attempts(2),
                run_at,
                repeat_count: 0,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_delayed_vs_ready() {
        let now = Utc::now();
        assert!(job(now + Duration::seconds(5)).is_delayed(now));
        assert!(job(now).is_ready(now));
    }

    #[test]
    fn test_attempts_left() {
        let mut j = job(Utc::now());
        j.attempts_made = 1;
        assert!(j.has_attempts_left());
        j.attempts_made = 2;
        assert!(!j.has_attempts_left());
    }

    #[test]
    fn test_state_strings() {
        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
        assert!(JobState::Failed.is_settled());
        assert!(!JobState::Active.is_settled());
    }
}
