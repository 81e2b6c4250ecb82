//! Workflow execution engine module
//!
//! This module contains:
//! - `validate` - Plan validation before a run
//! - `graph` - Step dependency graph and wave layout
//! - `capability` - Capability trait, registry and dispatcher
//! - `resilience` - Per-integration rate limiter, circuit breaker and timeout
//! - `sandbox` - WebAssembly sandbox for script steps
//! - `step` - Step executor state machine
//! - `scheduler` - Wave scheduler
//! - `events` - Progress stream
//! - `history` - Run history
//! - `actions` - Built-in capabilities
//! - `error` - Engine error types
//! - `result` - Step and run result types

pub mod actions;
pub mod capability;
pub mod error;
pub mod events;
pub mod graph;
pub mod history;
pub mod resilience;
pub mod result;
pub mod sandbox;
pub mod scheduler;
pub mod step;
pub mod validate;

pub use actions::{builtin_registry, register_builtins, BuiltinError};
pub use capability::{
    capability_fn, Capability, CapabilityDispatcher, CapabilityError, CapabilityRegistry,
    DispatchError,
};
pub use error::{ConfigurationError, ErrorKind, StepError};
pub use events::{ProgressEvent, ProgressSink, ProgressStatus};
pub use graph::DependencyGraph;
pub use history::{HistoryError, MemoryRunHistory, RunHistory, RunRecord};
pub use resilience::{
    BreakerState, IntegrationGuard, IntegrationPolicy, IntegrationStatus, PolicyOverride,
    Resilience, ResilienceConfig,
};
pub use result::{
    PrimaryFailure, RunResult, RunStatus, StepFailure, StepResult, StepStatus, WaveTiming,
};
pub use sandbox::{SandboxConfig, SandboxError, ScriptSandbox};
pub use scheduler::{ExecutionPlan, RunOptions, WaveScheduler};
pub use step::{StepExecutor, StepState};
pub use validate::{is_valid_capability_path, validate};
