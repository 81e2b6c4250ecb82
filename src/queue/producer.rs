//! Producer side of a named queue

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use super::backend::{QueueBackend, QueueError};
use super::clock::{self, QueueClock};
use super::job::{JobHandle, JobPayload, JobRecord, JobState, NewJob, QueueCounts};
use super::options::JobOptions;
use super::schedule;
use crate::config::QueueConfig;

/// Name given to jobs created through [`JobQueue::trigger_now`]
pub const MANUAL_JOB_NAME: &str = "manual";

#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn QueueBackend>,
    name: String,
    max_waiting: Option<usize>,
    default_options: JobOptions,
    clock: QueueClock,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn QueueBackend>, config: &QueueConfig) -> Self {
        Self {
            backend,
            name: config.name.clone(),
            max_waiting: config.max_waiting,
            default_options: config.default_options.clone(),
            clock: QueueClock::new(),
        }
    }

    pub fn with_clock(mut self, clock: QueueClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> QueueClock {
        self.clock
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Add a job. Options fall back to the queue defaults.
    pub async fn enqueue(
        &self,
        job_name: &str,
        payload: JobPayload,
        options: Option<JobOptions>,
    ) -> Result<JobHandle, QueueError> {
        let options = options.unwrap_or_else(|| self.default_options.clone());
        let now = self.clock.now();

        if let Some(max) = self.max_waiting {
            let counts = self.backend.counts(&self.name, now).await?;
            let waiting = counts.waiting + counts.delayed;
            if waiting >= max {
                return Err(QueueError::Full {
                    queue: self.name.clone(),
                    waiting,
                });
            }
        }

        let run_at = match &options.repeat {
            Some(repeat) => schedule::next_occurrence(&repeat.pattern, now)?,
            None => clock::after(now, Duration::from_millis(options.delay_ms))
                .ok_or(QueueError::InvalidDelay(options.delay_ms))?,
        };

        let record = self
            .backend
            .push(
                NewJob {
                    queue: self.name.clone(),
                    name: job_name.to_string(),
                    payload,
                    options,
                    run_at,
                    repeat_count: 0,
                },
                now,
            )
            .await?;

        info!(
            queue = %self.name,
            job_id = %record.id,
            job_name = %record.name,
            workflow_id = %record.payload.workflow_id,
            run_at = %record.run_at,
            "job enqueued"
        );
        Ok(JobHandle::from(&record))
    }

    /// Enqueue a run of `workflow_id`; the job is named after the workflow
    pub async fn enqueue_workflow(
        &self,
        workflow_id: &str,
        trigger: Value,
        options: Option<JobOptions>,
    ) -> Result<JobHandle, QueueError> {
        let payload = JobPayload {
            workflow_id: workflow_id.to_string(),
            trigger,
        };
        self.enqueue(workflow_id, payload, options).await
    }

    /// Ad hoc run, ready immediately, through the same worker path.
    /// Ignores the queue's default repeat and delay.
    pub async fn trigger_now(&self, workflow_id: &str, trigger: Value) -> Result<JobHandle, QueueError> {
        let options = JobOptions {
            repeat: None,
            delay_ms: 0,
            ..self.default_options.clone()
        };
        let payload = JobPayload {
            workflow_id: workflow_id.to_string(),
            trigger,
        };
        self.enqueue(MANUAL_JOB_NAME, payload, Some(options)).await
    }

    /// Queue the next tick of a repeating job. Returns `None` when the job
    /// does not repeat or its limit is reached.
    pub async fn schedule_next_repeat(&self, job: &JobRecord) -> Result<Option<JobHandle>, QueueError> {
        let Some(repeat) = &job.options.repeat else {
            return Ok(None);
        };

        let produced = job.repeat_count + 1;
        if repeat.limit.is_some_and(|limit| produced >= limit) {
            debug!(job_id = %job.id, produced, "repeat limit reached");
            return Ok(None);
        }

        let now = self.clock.now();
        let after = job.run_at.max(now);
        let run_at = schedule::next_occurrence(&repeat.pattern, after)?;

        let record = self
            .backend
            .push(
                NewJob {
                    queue: job.queue.clone(),
                    name: job.name.clone(),
                    payload: job.payload.clone(),
                    options: job.options.clone(),
                    run_at,
                    repeat_count: produced,
                },
                now,
            )
            .await?;

        debug!(job_id = %record.id, run_at = %run_at, "next repetition scheduled");
        Ok(Some(JobHandle::from(&record)))
    }

    /// Cancel a job. Returns the state it was in, or `None` if unknown.
    pub async fn cancel(&self, id: Uuid) -> Result<Option<JobState>, QueueError> {
        let previous = self.backend.cancel(id, self.clock.now()).await?;
        if let Some(state) = previous {
            info!(job_id = %id, previous = state.as_str(), "job cancel requested");
        }
        Ok(previous)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<JobRecord>, QueueError> {
        self.backend.get(id).await
    }

    pub async fn counts(&self) -> Result<QueueCounts, QueueError> {
        self.backend.counts(&self.name, self.clock.now()).await
    }

    pub async fn next_run_at(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        self.backend.next_run_at(&self.name).await
    }

    /// Remove settled jobs past their retention
    pub async fn prune(&self) -> Result<usize, QueueError> {
        let removed = self.backend.prune(&self.name, self.clock.now()).await?;
        if removed > 0 {
            debug!(queue = %self.name, removed, "pruned settled jobs");
        }
        Ok(removed)
    }
}
