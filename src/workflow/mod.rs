//! Workflow types and definitions
//!
//! This module contains all types for defining and parsing workflows:
//! - `definition` - WorkflowDefinition, StepDefinition and Trigger
//! - `placeholder` - Recursive-descent parser for `{{ }}` placeholders
//! - `resolver` - Placeholder resolution against the execution context
//! - `context` - ExecutionContext for runtime bindings
//! - `loader` - Load workflows from files and directories
//! - `store` - Workflow lookup used by queued jobs

pub mod context;
pub mod definition;
pub mod loader;
pub mod placeholder;
pub mod resolver;
pub mod store;

pub use context::{ContextError, ExecutionContext, TRIGGER_BINDING};
pub use definition::{StepDefinition, Trigger, TriggerKind, WorkflowDefinition};
pub use loader::{LoadError, WorkflowLoader};
pub use placeholder::{Placeholder, PlaceholderError, PlaceholderPath, Segment, Template};
pub use resolver::{resolve, ResolutionError, ResolutionFailure};
pub use store::{DirectoryWorkflowStore, MemoryWorkflowStore, WorkflowStore};
