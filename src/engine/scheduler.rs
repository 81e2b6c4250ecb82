//! Wave Scheduler - runs a workflow wave by wave
//!
//! 1. Validates the definition and builds the dependency graph
//! 2. Runs each wave's steps concurrently
//! 3. Waits for the whole wave to settle before starting the next
//! 4. After a failure, lets the current wave finish and skips the rest
//! 5. Resolves the workflow `returnValue` once every step succeeded

use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::capability::CapabilityRegistry;
use super::error::ConfigurationError;
use super::events::{ProgressEvent, ProgressSink, ProgressStatus};
use super::graph::DependencyGraph;
use super::resilience::Resilience;
use super::result::{PrimaryFailure, RunResult, RunStatus, StepResult, StepStatus, WaveTiming};
use super::step::{StepExecutor, StepScope};
use super::validate::validate;
use crate::workflow::{resolve, ExecutionContext, StepDefinition, WorkflowDefinition};

/// Validated steps plus their wave layout
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub steps: Vec<StepDefinition>,
    pub graph: DependencyGraph,
}

impl ExecutionPlan {
    pub fn waves(&self) -> &[Vec<String>] {
        self.graph.waves()
    }
}

/// Per-run knobs
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run id to use instead of a generated one
    pub run_id: Option<String>,
    /// Observed between waves
    pub cancel: CancellationToken,
    pub progress: ProgressSink,
}

#[derive(Clone)]
pub struct WaveScheduler {
    registry: Arc<CapabilityRegistry>,
    resilience: Arc<Resilience>,
    executor: StepExecutor,
}

impl WaveScheduler {
    pub fn new(registry: Arc<CapabilityRegistry>, resilience: Arc<Resilience>) -> Self {
        Self {
            executor: StepExecutor::new(registry.clone(), resilience.clone()),
            registry,
            resilience,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn resilience(&self) -> &Arc<Resilience> {
        &self.resilience
    }

    /// Validate and lay out a workflow without running it
    pub fn plan(&self, workflow: &WorkflowDefinition) -> Result<ExecutionPlan, ConfigurationError> {
        let steps = validate(workflow, Some(&self.registry))?;
        let graph = DependencyGraph::build(&steps)?;
        Ok(ExecutionPlan { steps, graph })
    }

    #[instrument(skip(self, workflow, trigger, options), fields(workflow_id = %workflow.id))]
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        trigger: Value,
        options: RunOptions,
    ) -> Result<RunResult, ConfigurationError> {
        let plan = self.plan(workflow)?;

        let run_id = options
            .run_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            run_id = %run_id,
            steps = plan.steps.len(),
            waves = plan.waves().len(),
            "Starting workflow run"
        );

        let by_id: HashMap<&str, &StepDefinition> =
            plan.steps.iter().map(|s| (s.id.as_str(), s)).collect();
        let context = RwLock::new(ExecutionContext::with_trigger(run_id.clone(), trigger));

        let mut results: HashMap<String, StepResult> = HashMap::new();
        let mut timings = Vec::new();
        let mut halted: Option<RunStatus> = None;

        for (index, wave) in plan.waves().iter().enumerate() {
            if halted.is_none() && options.cancel.is_cancelled() {
                info!(run_id = %run_id, wave = index, "Run cancelled at wave boundary");
                halted = Some(RunStatus::Cancelled);
            }

            if halted.is_some() {
                for id in wave {
                    if let Some(step) = by_id.get(id.as_str()) {
                        options
                            .progress
                            .emit(ProgressEvent::new(&run_id, id, ProgressStatus::Skipped));
                        results.insert(
                            id.clone(),
                            StepResult::skipped(id, &step.capability, index),
                        );
                    }
                }
                continue;
            }

            info!(run_id = %run_id, wave = index, steps = ?wave, "Starting wave");
            let wave_started = Utc::now();
            let wave_start = Instant::now();

            let scope = StepScope {
                run_id: &run_id,
                wave: index,
                context: &context,
                progress: &options.progress,
            };
            let outcomes = join_all(
                wave.iter()
                    .filter_map(|id| by_id.get(id.as_str()))
                    .map(|step| self.executor.execute(step, &scope)),
            )
            .await;

            let failed: Vec<&str> = outcomes
                .iter()
                .filter(|r| r.status == StepStatus::Failed)
                .map(|r| r.step_id.as_str())
                .collect();
            if !failed.is_empty() {
                warn!(run_id = %run_id, wave = index, failed = ?failed, "Wave failed, skipping remaining waves");
                halted = Some(RunStatus::Failed);
            }

            timings.push(WaveTiming {
                index,
                steps: wave.clone(),
                started_at: wave_started,
                ended_at: Utc::now(),
                duration_ms: wave_start.elapsed().as_millis() as u64,
            });

            for outcome in outcomes {
                results.insert(outcome.step_id.clone(), outcome);
            }
        }

        let status = halted.unwrap_or(RunStatus::Success);
        let steps: Vec<StepResult> = plan
            .steps
            .iter()
            .filter_map(|s| results.remove(&s.id))
            .collect();
        let primary_failure = primary_failure(&steps);

        let (return_value, return_value_error) = match (&workflow.return_value, status) {
            (Some(template), RunStatus::Success) => {
                let ctx = context.read().await;
                match resolve(template, &ctx, "returnValue") {
                    Ok(value) => (Some(value), None),
                    Err(e) => {
                        warn!(run_id = %run_id, error = %e, "Failed to resolve returnValue");
                        (None, Some(e.to_string()))
                    }
                }
            }
            _ => (None, None),
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match status {
            RunStatus::Success => info!(run_id = %run_id, duration_ms, "Workflow run succeeded"),
            _ => warn!(
                run_id = %run_id,
                duration_ms,
                status = status.as_str(),
                failed_step = primary_failure.as_ref().map(|f| f.step_id.as_str()),
                "Workflow run did not succeed"
            ),
        }

        Ok(RunResult {
            run_id,
            workflow_id: workflow.id.clone(),
            status,
            steps,
            waves: timings,
            primary_failure,
            return_value,
            return_value_error,
            started_at,
            ended_at: Utc::now(),
            duration_ms,
        })
    }
}

/// Earliest-started failed step; ties go to definition order
fn primary_failure(steps: &[StepResult]) -> Option<PrimaryFailure> {
    steps
        .iter()
        .enumerate()
        .filter(|(_, s)| s.status == StepStatus::Failed)
        .min_by_key(|(position, s)| (s.started_at, *position))
        .and_then(|(_, s)| {
            s.error.as_ref().map(|e| PrimaryFailure {
                step_id: s.step_id.clone(),
                kind: e.kind,
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ErrorKind;
    use crate::engine::result::StepFailure;
    use chrono::TimeZone;

    fn failed(id: &str, started_secs: i64, kind: ErrorKind) -> StepResult {
        let mut r = StepResult::skipped(id, "core.fail", 0);
        r.status = StepStatus::Failed;
        r.started_at = Some(Utc.timestamp_opt(started_secs, 0).unwrap());
        r.error = Some(StepFailure {
            kind,
            message: "x".into(),
        });
        r
    }

    #[test]
    fn test_primary_failure_prefers_earliest_start() {
        let steps = vec![
            failed("late", 20, ErrorKind::Invocation),
            failed("early", 10, ErrorKind::Timeout),
        ];
        assert_eq!(
            primary_failure(&steps),
            Some(PrimaryFailure {
                step_id: "early".into(),
                kind: ErrorKind::Timeout,
            })
        );
    }

    #[test]
    fn test_primary_failure_tie_uses_definition_order() {
        let steps = vec![
            StepResult::skipped("ok", "core.echo", 0),
            failed("first", 10, ErrorKind::Invocation),
            failed("second", 10, ErrorKind::Timeout),
        ];
        assert_eq!(primary_failure(&steps).unwrap().step_id, "first");
        assert_eq!(primary_failure(&steps[..1]), None);
    }
}
