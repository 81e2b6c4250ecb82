//! Queue workers
//!
//! `JobProcessor` turns one claimed job into one workflow run and writes the
//! run to history. `WorkerPool` claims jobs up to its concurrency, settles
//! them (complete, retry with backoff, or fail), chains repeating jobs and
//! prunes expired records on an interval.
//!
//! A retry re-runs the whole workflow from its first step. Configuration
//! errors, unknown workflows and cancelled runs are never retried.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::backend::QueueError;
use super::clock;
use super::job::{JobRecord, JobSummary};
use super::producer::JobQueue;
use crate::config::WorkerConfig;
use crate::engine::{
    ConfigurationError, ErrorKind, ProgressSink, RunHistory, RunOptions, RunRecord, RunResult,
    RunStatus, WaveScheduler,
};
use crate::workflow::WorkflowStore;

/// How a processed job should be settled
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(JobSummary),
    Failed {
        error: String,
        summary: Option<JobSummary>,
        retryable: bool,
    },
    Cancelled(Option<JobSummary>),
}

fn summary_of(result: &RunResult) -> JobSummary {
    JobSummary {
        run_id: Some(result.run_id.clone()),
        failed_step: result.primary_failure.as_ref().map(|f| f.step_id.clone()),
        error_kind: result.primary_failure.as_ref().map(|f| f.kind),
        return_value: result.return_value.clone(),
    }
}

fn configuration_failure(error: ConfigurationError) -> JobOutcome {
    JobOutcome::Failed {
        error: error.to_string(),
        summary: Some(JobSummary {
            run_id: None,
            failed_step: None,
            error_kind: Some(ErrorKind::Configuration),
            return_value: None,
        }),
        retryable: false,
    }
}

pub struct JobProcessor {
    scheduler: WaveScheduler,
    store: Arc<dyn WorkflowStore>,
    history: Arc<dyn RunHistory>,
    progress: ProgressSink,
}

impl JobProcessor {
    pub fn new(
        scheduler: WaveScheduler,
        store: Arc<dyn WorkflowStore>,
        history: Arc<dyn RunHistory>,
    ) -> Self {
        Self {
            scheduler,
            store,
            history,
            progress: ProgressSink::default(),
        }
    }

    /// Publish step progress of every processed run
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn scheduler(&self) -> &WaveScheduler {
        &self.scheduler
    }

    #[instrument(
        skip(self, job, cancel),
        fields(job_id = %job.id, workflow_id = %job.payload.workflow_id, attempt = job.attempts_made)
    )]
    pub async fn process(&self, job: &JobRecord, cancel: CancellationToken) -> JobOutcome {
        let workflow_id = &job.payload.workflow_id;

        let workflow = match self.store.get(workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                return configuration_failure(ConfigurationError::WorkflowNotFound(
                    workflow_id.clone(),
                ))
            }
            Err(e) => {
                warn!("Failed to load workflow: {}", e);
                return JobOutcome::Failed {
                    error: format!("failed to load workflow: {e}"),
                    summary: None,
                    retryable: true,
                };
            }
        };

        let options = RunOptions {
            run_id: None,
            cancel,
            progress: self.progress.clone(),
        };

        let result = match self
            .scheduler
            .run(&workflow, job.payload.trigger.clone(), options)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!("Workflow rejected: {}", e);
                return configuration_failure(e);
            }
        };

        match RunRecord::from_result(
            &result,
            workflow.fingerprint(),
            Some(job.id.to_string()),
            job.attempts_made,
        ) {
            Ok(record) => {
                if let Err(e) = self.history.record(record).await {
                    error!(run_id = %result.run_id, "Failed to record run: {}", e);
                }
            }
            Err(e) => error!(run_id = %result.run_id, "Failed to serialize run: {}", e),
        }

        let summary = summary_of(&result);
        match result.status {
            RunStatus::Success => JobOutcome::Completed(summary),
            RunStatus::Cancelled => JobOutcome::Cancelled(Some(summary)),
            RunStatus::Failed => {
                let error = match &result.primary_failure {
                    Some(failure) => format!("step '{}' failed ({})", failure.step_id, failure.kind),
                    None => "run failed".to_string(),
                };
                // A step that hit a configuration problem fails the same way every time
                let retryable = result
                    .primary_failure
                    .as_ref()
                    .map_or(true, |f| f.kind != ErrorKind::Configuration);
                JobOutcome::Failed {
                    error,
                    summary: Some(summary),
                    retryable,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub capacity: usize,
    pub active: usize,
}

impl WorkerStats {
    pub fn utilization_percent(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.active as f64 * 100.0 / self.capacity as f64
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    queue: JobQueue,
    processor: Arc<JobProcessor>,
    slots: Arc<Semaphore>,
    running: Arc<DashMap<Uuid, CancellationToken>>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(queue: JobQueue, processor: JobProcessor, config: WorkerConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        Self {
            queue,
            processor: Arc::new(processor),
            slots: Arc::new(Semaphore::new(concurrency)),
            running: Arc::new(DashMap::new()),
            config: WorkerConfig {
                concurrency,
                ..config
            },
        }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn stats(&self) -> WorkerStats {
        let capacity = self.config.concurrency;
        WorkerStats {
            capacity,
            active: capacity.saturating_sub(self.slots.available_permits()),
        }
    }

    /// Cancel a job. A job running in this pool is stopped at its next wave
    /// boundary without waiting for the cancel watcher.
    pub async fn cancel_job(&self, id: Uuid) -> Result<bool, QueueError> {
        let previous = self.queue.cancel(id).await?;
        if let Some(token) = self.running.get(&id) {
            token.cancel();
        }
        Ok(previous.is_some())
    }

    /// Claim and run one ready job to completion. Returns the settled record.
    pub async fn process_next(&self) -> Result<Option<JobRecord>, QueueError> {
        let Ok(permit) = self.slots.clone().acquire_owned().await else {
            return Ok(None);
        };
        let claimed = self.claim().await?;
        let Some(job) = claimed else {
            return Ok(None);
        };
        let settled = self.execute(job).await;
        drop(permit);
        settled.map(Some)
    }

    /// Claim jobs until `shutdown` fires, then wait for in-flight jobs
    #[instrument(skip(self, shutdown), fields(queue = %self.queue.name(), concurrency = self.config.concurrency))]
    pub async fn run(&self, shutdown: CancellationToken) {
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let prune_every = Duration::from_millis(self.config.prune_interval_ms);
        let mut last_prune = Instant::now();

        info!("Worker pool started");

        while !shutdown.is_cancelled() {
            if last_prune.elapsed() >= prune_every {
                if let Err(e) = self.queue.prune().await {
                    warn!("Prune failed: {}", e);
                }
                last_prune = Instant::now();
            }

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.claim().await {
                Ok(Some(job)) => {
                    let pool = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = pool.execute(job).await {
                            error!("Failed to settle job: {}", e);
                        }
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    let wait = self.idle_wait(poll).await;
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!("Claim failed: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(poll) => {}
                    }
                }
            }
        }

        info!(active = self.stats().active, "Worker pool draining");
        let _ = self
            .slots
            .acquire_many(self.config.concurrency as u32)
            .await;
        info!("Worker pool stopped");
    }

    /// Sleep until the next delayed job is due, bounded by the poll interval
    async fn idle_wait(&self, poll: Duration) -> Duration {
        let clock = self.queue.clock();
        match self.queue.next_run_at().await {
            Ok(Some(run_at)) => {
                let due = clock.instant_at(run_at);
                due.saturating_duration_since(Instant::now()).min(poll)
            }
            _ => poll,
        }
    }

    async fn claim(&self) -> Result<Option<JobRecord>, QueueError> {
        let now = self.queue.clock().now();
        let claimed = self.queue.backend().claim(self.queue.name(), now).await?;

        if let Some(job) = &claimed {
            debug!(job_id = %job.id, attempt = job.attempts_made, "Claimed job");
            // The repeat chain advances on the first attempt only
            if job.attempts_made == 1 {
                if let Err(e) = self.queue.schedule_next_repeat(job).await {
                    warn!(job_id = %job.id, "Failed to schedule next repetition: {}", e);
                }
            }
        }
        Ok(claimed)
    }

    async fn execute(&self, job: JobRecord) -> Result<JobRecord, QueueError> {
        let token = CancellationToken::new();
        self.running.insert(job.id, token.clone());
        let watcher = self.watch_cancel(job.id, token.clone());

        let outcome = self.processor.process(&job, token.clone()).await;

        watcher.abort();
        self.running.remove(&job.id);

        // A cancel that lands after the last wave boundary still stops retries
        let outcome = match outcome {
            JobOutcome::Failed { error, summary, retryable } => {
                if self.cancel_requested(&job, &token).await {
                    JobOutcome::Cancelled(summary)
                } else {
                    JobOutcome::Failed {
                        error,
                        summary,
                        retryable,
                    }
                }
            }
            outcome => outcome,
        };
        self.settle(&job, outcome).await
    }

    async fn cancel_requested(&self, job: &JobRecord, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            return true;
        }
        match self.queue.get(job.id).await {
            Ok(Some(record)) => record.cancel_requested,
            Ok(None) => false,
            Err(e) => {
                debug!(job_id = %job.id, "Cancel check failed: {}", e);
                false
            }
        }
    }

    /// Observe cancel requests made through the backend by other processes
    fn watch_cancel(&self, id: Uuid, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let queue = self.queue.clone();
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(poll) => {}
                }
                match queue.get(id).await {
                    Ok(Some(job)) if job.cancel_requested => {
                        token.cancel();
                        return;
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => return,
                    Err(e) => debug!(job_id = %id, "Cancel watcher poll failed: {}", e),
                }
            }
        })
    }

    async fn settle(&self, job: &JobRecord, outcome: JobOutcome) -> Result<JobRecord, QueueError> {
        let backend = self.queue.backend();
        let now = self.queue.clock().now();

        let settled = match outcome {
            JobOutcome::Completed(summary) => {
                let record = backend.complete(job.id, summary, now).await?;
                info!(job_id = %job.id, attempt = job.attempts_made, "Job completed");
                record
            }
            JobOutcome::Cancelled(summary) => {
                let record = backend.fail(job.id, "cancelled", summary, now).await?;
                info!(job_id = %job.id, "Job cancelled");
                record
            }
            JobOutcome::Failed {
                error,
                summary,
                retryable,
            } => {
                let delay = job.options.retry_delay(job.attempts_made);
                let retry_at = if retryable && job.has_attempts_left() {
                    clock::after(now, delay)
                } else {
                    None
                };

                if let Some(run_at) = retry_at {
                    match backend.retry(job.id, &error, run_at).await {
                        Ok(record) => {
                            warn!(
                                job_id = %job.id,
                                attempt = job.attempts_made,
                                attempts = job.options.attempts,
                                delay_ms = delay.as_millis() as u64,
                                "Job failed, retrying: {}",
                                error
                            );
                            record
                        }
                        // Cancelled by another process after the run finished
                        Err(QueueError::CancelRequested(_)) => {
                            let record = backend.fail(job.id, "cancelled", summary, now).await?;
                            info!(job_id = %job.id, "Job cancelled");
                            record
                        }
                        Err(e) => return Err(e),
                    }
                } else {
                    let record = backend.fail(job.id, &error, summary, now).await?;
                    error!(
                        job_id = %job.id,
                        attempt = job.attempts_made,
                        "Job failed: {}",
                        error
                    );
                    record
                }
            }
        };

        if settled.state.is_settled() {
            if let Err(e) = self.queue.prune().await {
                warn!("Prune failed: {}", e);
            }
        }
        Ok(settled)
    }
}
