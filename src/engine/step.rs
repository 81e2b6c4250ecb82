//! Step executor
//!
//! Drives one step through `Pending -> Resolving -> Invoking ->
//! {Success | Failed} -> Recorded`. Errors never escape: every outcome ends
//! up in the returned [`StepResult`].

use std::sync::Arc;
use tokio::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::capability::{CapabilityDispatcher, CapabilityRegistry, DispatchError};
use super::error::StepError;
use super::events::{ProgressEvent, ProgressSink, ProgressStatus};
use super::resilience::{GuardError, Resilience};
use super::result::{StepFailure, StepResult, StepStatus};
use crate::workflow::{resolve, ExecutionContext, StepDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Resolving,
    Invoking,
    Success,
    Failed,
    Recorded,
}

/// Shared per-run state a step reads from and writes to
pub struct StepScope<'a> {
    pub run_id: &'a str,
    pub wave: usize,
    pub context: &'a RwLock<ExecutionContext>,
    pub progress: &'a ProgressSink,
}

#[derive(Clone)]
pub struct StepExecutor {
    dispatcher: CapabilityDispatcher,
    resilience: Arc<Resilience>,
}

struct Tracker<'a> {
    step: &'a StepDefinition,
    scope: &'a StepScope<'a>,
    state: StepState,
}

impl Tracker<'_> {
    fn transition(&mut self, next: StepState) {
        debug!(
            step_id = %self.step.id,
            from = ?self.state,
            to = ?next,
            "Step state change"
        );
        self.state = next;

        let status = match next {
            StepState::Resolving => ProgressStatus::Resolving,
            StepState::Invoking => ProgressStatus::Invoking,
            // Terminal events are emitted once the result is recorded
            _ => return,
        };
        self.scope
            .progress
            .emit(ProgressEvent::new(self.scope.run_id, &self.step.id, status));
    }
}

impl StepExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, resilience: Arc<Resilience>) -> Self {
        Self {
            dispatcher: CapabilityDispatcher::new(registry),
            resilience,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        self.dispatcher.registry()
    }

    pub async fn execute(&self, step: &StepDefinition, scope: &StepScope<'_>) -> StepResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut tracker = Tracker {
            step,
            scope,
            state: StepState::Pending,
        };

        let outcome = self.run_step(step, scope, &mut tracker).await;
        let ended_at = Utc::now();
        let duration_ms = start.elapsed().as_millis() as u64;

        let (status, output, error) = match outcome {
            Ok(output) => {
                tracker.transition(StepState::Success);
                (StepStatus::Success, Some(output), None)
            }
            Err(e) => {
                tracker.transition(StepState::Failed);
                warn!(
                    run_id = %scope.run_id,
                    step_id = %step.id,
                    kind = %e.kind(),
                    error = %e,
                    "Step failed"
                );
                let failure = StepFailure {
                    kind: e.kind(),
                    message: e.to_string(),
                };
                (StepStatus::Failed, None, Some(failure))
            }
        };

        let result = StepResult {
            step_id: step.id.clone(),
            capability: step.capability.clone(),
            wave: scope.wave,
            status,
            output,
            error,
            started_at: Some(started_at),
            ended_at: Some(ended_at),
            duration_ms,
        };

        let mut event = ProgressEvent::new(
            scope.run_id,
            &step.id,
            match status {
                StepStatus::Success => ProgressStatus::Success,
                _ => ProgressStatus::Failed,
            },
        );
        event.started_at = result.started_at;
        event.ended_at = result.ended_at;
        event.output = result.output.clone();
        event.error = result.error.as_ref().map(|f| f.message.clone());
        event.error_kind = result.error.as_ref().map(|f| f.kind);
        scope.progress.emit(event);

        tracker.transition(StepState::Recorded);
        result
    }

    async fn run_step(
        &self,
        step: &StepDefinition,
        scope: &StepScope<'_>,
        tracker: &mut Tracker<'_>,
    ) -> Result<Value, StepError> {
        tracker.transition(StepState::Resolving);
        let inputs = {
            let ctx = scope.context.read().await;
            resolve(&step.inputs, &ctx, &step.id)?
        };

        let integration = self
            .registry()
            .integration_of(&step.capability)
            .ok_or_else(|| StepError::CapabilityNotFound(step.capability.clone()))?
            .to_string();

        tracker.transition(StepState::Invoking);
        let guard = self.resilience.guard(&integration);
        let output = guard
            .call(self.dispatcher.invoke(&step.capability, inputs))
            .await
            .map_err(|e| match e {
                GuardError::BreakerOpen => StepError::BreakerOpen {
                    integration: integration.clone(),
                },
                GuardError::Timeout(timeout) => StepError::Timeout {
                    capability: step.capability.clone(),
                    timeout,
                },
                GuardError::LimiterClosed => StepError::Invocation {
                    capability: step.capability.clone(),
                    message: "rate limiter closed".to_string(),
                },
                GuardError::Inner(DispatchError::NotFound(path)) => {
                    StepError::CapabilityNotFound(path)
                }
                GuardError::Inner(DispatchError::Invocation { capability, source }) => {
                    if source.exhausted {
                        StepError::ResourceExhausted {
                            capability,
                            message: source.message,
                        }
                    } else {
                        StepError::Invocation {
                            capability,
                            message: source.message,
                        }
                    }
                }
            })?;

        // Sole writer of this binding
        scope
            .context
            .write()
            .await
            .bind(&step.output_binding, output.clone())?;

        Ok(output)
    }
}
