//! In-memory queue backend for single-process use and tests

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::backend::{QueueBackend, QueueError};
use super::job::{JobRecord, JobState, JobSummary, NewJob, QueueCounts};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, (u64, JobRecord)>,
    next_seq: u64,
}

impl Inner {
    fn job_mut(&mut self, id: Uuid) -> Result<&mut JobRecord, QueueError> {
        self.jobs
            .get_mut(&id)
            .map(|(_, job)| job)
            .ok_or(QueueError::NotFound(id))
    }

    fn active_mut(&mut self, id: Uuid) -> Result<&mut JobRecord, QueueError> {
        let job = self.job_mut(id)?;
        if job.state != JobState::Active {
            return Err(QueueError::InvalidState {
                id,
                state: job.state,
                expected: JobState::Active,
            });
        }
        Ok(job)
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn push(&self, job: NewJob, now: DateTime<Utc>) -> Result<JobRecord, QueueError> {
        let mut inner = self.inner.lock().await;
        let record = JobRecord::from_new(job, now);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(record.id, (seq, record.clone()));
        Ok(record)
    }

    async fn claim(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<JobRecord>, QueueError> {
        let mut inner = self.inner.lock().await;

        let next = inner
            .jobs
            .values()
            .filter(|(_, job)| job.queue == queue && job.is_ready(now))
            .min_by_key(|(seq, job)| (job.options.priority, job.run_at, *seq))
            .map(|(_, job)| job.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let job = inner.job_mut(id)?;
        job.state = JobState::Active;
        job.attempts_made += 1;
        Ok(Some(job.clone()))
    }

    async fn complete(
        &self,
        id: Uuid,
        summary: JobSummary,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner.active_mut(id)?;
        job.state = JobState::Completed;
        job.finished_at = Some(now);
        job.summary = Some(summary);
        job.last_error = None;
        Ok(job.clone())
    }

    async fn fail(
        &self,
        id: Uuid,
        error: &str,
        summary: Option<JobSummary>,
        now: DateTime<Utc>,
    ) -> Result<JobRecord, QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner.active_mut(id)?;
        job.state = JobState::Failed;
        job.finished_at = Some(now);
        job.last_error = Some(error.to_string());
        if summary.is_some() {
            job.summary = summary;
        }
        Ok(job.clone())
    }

    async fn retry(&self, id: Uuid, error: &str, run_at: DateTime<Utc>) -> Result<JobRecord, QueueError> {
        let mut inner = self.inner.lock().await;
        let job = inner.active_mut(id)?;
        if job.cancel_requested {
            return Err(QueueError::CancelRequested(id));
        }
        job.state = JobState::Waiting;
        job.run_at = run_at;
        job.last_error = Some(error.to_string());
        Ok(job.clone())
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<JobState>, QueueError> {
        let mut inner = self.inner.lock().await;
        let Some((_, job)) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };

        let previous = job.state;
        match previous {
            JobState::Waiting => {
                job.state = JobState::Failed;
                job.finished_at = Some(now);
                job.last_error = Some("cancelled".to_string());
            }
            JobState::Active => job.cancel_requested = true,
            JobState::Completed | JobState::Failed => {}
        }
        Ok(Some(previous))
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&id).map(|(_, job)| job.clone()))
    }

    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> Result<QueueCounts, QueueError> {
        let inner = self.inner.lock().await;
        let mut counts = QueueCounts::default();
        for (_, job) in inner.jobs.values().filter(|(_, j)| j.queue == queue) {
            match job.state {
                JobState::Waiting if job.is_delayed(now) => counts.delayed += 1,
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn settled(&self, queue: &str) -> Result<Vec<JobRecord>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .filter(|(_, j)| j.queue == queue && j.state.is_settled())
            .map(|(_, j)| j.clone())
            .collect())
    }

    async fn remove(&self, ids: &[Uuid]) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock().await;
        Ok(ids.iter().filter(|id| inner.jobs.remove(id).is_some()).count())
    }

    async fn next_run_at(&self, queue: &str) -> Result<Option<DateTime<Utc>>, QueueError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .filter(|(_, j)| j.queue == queue && j.state == JobState::Waiting)
            .map(|(_, j)| j.run_at)
            .min())
    }
}
