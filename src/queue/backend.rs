//! Queue broker backends
//!
//! A backend stores job records and hands out ready jobs one at a time.
//! Claim order: lowest priority number first, then earliest `run_at`, then
//! insertion order. Claiming marks the job active and counts the attempt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::job::{JobRecord, JobState, JobSummary, NewJob, QueueCounts};
use super::retention;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue '{queue}' is full ({waiting} waiting jobs)")]
    Full { queue: String, waiting: usize },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {id} is {state:?}, expected {expected:?}")]
    InvalidState {
        id: Uuid,
        state: JobState,
        expected: JobState,
    },

    #[error("job {0} was cancelled")]
    CancelRequested(Uuid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("delay of {0}ms is out of range")]
    InvalidDelay(u64),

    #[error("invalid repeat pattern '{pattern}': {reason}")]
    InvalidSchedule { pattern: String, reason: String },
}

#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn push(&self, job: NewJob, now: DateTime<Utc>) -> Result<JobRecord, QueueError>;

    /// Claim the next ready job of `queue`, if any
    async fn claim(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError>;

    async fn complete(
        &self,
        id: Uuid,
        summary: JobSummary,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, QueueError>;

    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        summary: Option<JobSummary>,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, QueueError>;

    /// Put an active job back to waiting, due at `run_at`. Refused with
    /// `CancelRequested` once the job has been flagged for cancellation.
    async fn retry(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<JobRecord, QueueError>;

    /// Cancel a job: a waiting job fails immediately, an active job is
    /// flagged for its worker. Returns the state the job was in.
    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<JobState>, QueueError>;

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError>;

    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueCounts, QueueError>;

    /// Settled (completed or failed) jobs of `queue`
    async fn settled(&self, queue: &str) -> Result<Vec<JobRecord>, QueueError>;

    async fn remove(&self, ids: &[Uuid]) -> Result<usize, QueueError>;

    /// Earliest `run_at` among waiting jobs
    async fn next_run_at(&self, queue: &str) -> Result<Option<DateTime<Utc>>, QueueError>;

    /// Remove settled jobs past their retention; returns how many
    async fn prune(&self, queue: &str, now: DateTime<Utc>) -> Result<usize, QueueError> {
        let settled = self.settled(queue).await?;
        let expired = retention::expired(&settled, now);
        if expired.is_empty() {
            return Ok(0);
        }
        self.remove(&expired).await
    }
}
