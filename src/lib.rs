//! # stepflow
//!
//! A workflow execution engine. A workflow is a list of steps, each naming a
//! registered capability and its inputs. Inputs may reference earlier
//! outputs with `{{ step.output.field }}` placeholders; those references
//! form a dependency graph that is run wave by wave, with independent steps
//! of a wave running concurrently.
//!
//! ## Features
//!
//! - **Wave scheduling** - Steps grouped into dependency waves, fail-fast between waves
//! - **Placeholders** - Whole-value placeholders keep their JSON type, embedded ones interpolate
//! - **Resilience** - Per-integration rate limiter, circuit breaker and timeout
//! - **Script steps** - WebAssembly modules run in a sandbox with memory, fuel and time limits
//! - **Job queue** - Retries with backoff, cron repeat, retention, manual triggers and cancel
//! - **Run history** - One record per settled run, in memory or SQLite
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use stepflow::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let workflow = WorkflowLoader::from_json(r#"{
//!         "id": "greet",
//!         "trigger": { "type": "manual" },
//!         "config": {
//!             "steps": [
//!                 { "id": "hello", "module": "core.echo", "inputs": { "text": "hi {{trigger.name}}" } }
//!             ],
//!             "returnValue": "{{hello.text}}"
//!         }
//!     }"#)?;
//!
//!     let registry = Arc::new(builtin_registry(&SandboxConfig::default())?);
//!     let resilience = Arc::new(Resilience::new(ResilienceConfig::default()));
//!     let scheduler = WaveScheduler::new(registry, resilience);
//!
//!     let result = scheduler
//!         .run(&workflow, json!({ "name": "ada" }), RunOptions::default())
//!         .await?;
//!     println!("{:?}", result.return_value);
//!     Ok(())
//! }
//! ```

pub mod capacity;
pub mod config;
pub mod engine;
pub mod queue;
pub mod storage;
pub mod workflow;

// Re-export main types
pub use capacity::{CapacityMonitor, CapacityReport};
pub use config::{ConfigError, DatabaseConfig, EngineConfig, QueueConfig, WorkerConfig};
pub use engine::{
    builtin_registry, Capability, CapabilityError, CapabilityRegistry, ConfigurationError,
    ErrorKind, ProgressEvent, ProgressSink, RunHistory, RunOptions, RunResult,
    RunStatus, StepError, StepResult, StepStatus, WaveScheduler,
};
pub use queue::{JobHandle, JobOptions, JobQueue, QueueBackend, QueueError, WorkerPool};
pub use storage::{Backends, Database, StorageError};
pub use workflow::{
    ExecutionContext, LoadError, ResolutionError, StepDefinition, WorkflowDefinition,
    WorkflowLoader, WorkflowStore,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capacity::{CapacityMonitor, CapacityReport};
    pub use crate::config::EngineConfig;
    pub use crate::engine::{
        builtin_registry, capability_fn, Capability, CapabilityError, CapabilityRegistry,
        ConfigurationError, MemoryRunHistory, ProgressSink, Resilience, ResilienceConfig,
        RunHistory, RunOptions, RunResult, RunStatus, SandboxConfig, WaveScheduler,
    };
    pub use crate::queue::{
        Backoff, JobOptions, JobProcessor, JobQueue, MemoryQueue, Retention, WorkerPool,
    };
    pub use crate::storage::Backends;
    pub use crate::workflow::{
        DirectoryWorkflowStore, MemoryWorkflowStore, StepDefinition, WorkflowDefinition,
        WorkflowLoader, WorkflowStore,
    };
}
