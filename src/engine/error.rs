//! Engine error types
//!
//! `ConfigurationError` is raised before any step runs and is never retried.
//! `StepError` covers everything that can fail a single step; it is caught by
//! the step executor and recorded rather than propagated.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::workflow::{ContextError, ResolutionError};

/// Failure category recorded in results and run history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Resolution,
    Invocation,
    BreakerOpen,
    Timeout,
    ResourceExhaustion,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Invocation => "invocation",
            ErrorKind::BreakerOpen => "breaker_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ResourceExhaustion => "resource_exhaustion",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "configuration" => ErrorKind::Configuration,
            "resolution" => ErrorKind::Resolution,
            "invocation" => ErrorKind::Invocation,
            "breaker_open" => ErrorKind::BreakerOpen,
            "timeout" => ErrorKind::Timeout,
            "resource_exhaustion" => ErrorKind::ResourceExhaustion,
            "cancelled" => ErrorKind::Cancelled,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Problems with a workflow definition, detected before execution
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("step at position {0} has an empty id")]
    EmptyStepId(usize),

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("output binding '{binding}' is produced by both '{first}' and '{second}'")]
    DuplicateOutputBinding {
        binding: String,
        first: String,
        second: String,
    },

    #[error("step '{step}' uses the reserved binding '{binding}'")]
    ReservedBinding { step: String, binding: String },

    #[error("step '{step}' has an invalid capability path '{path}'")]
    InvalidCapabilityPath { step: String, path: String },

    #[error("step '{step}' uses unknown capability '{path}'")]
    UnknownCapability { step: String, path: String },

    #[error("step '{step}' has an invalid placeholder: {reason}")]
    InvalidPlaceholder { step: String, reason: String },

    #[error("invalid returnValue template: {0}")]
    InvalidReturnValue(String),

    #[error("cyclic dependency between steps: {}", .steps.join(", "))]
    CyclicDependency { steps: Vec<String> },

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),
}

/// Failure of a single step
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("capability '{0}' is not registered")]
    CapabilityNotFound(String),

    #[error("capability '{capability}' failed: {message}")]
    Invocation { capability: String, message: String },

    #[error("circuit breaker for integration '{integration}' is open")]
    BreakerOpen { integration: String },

    #[error("capability '{capability}' timed out after {timeout:?}")]
    Timeout {
        capability: String,
        timeout: Duration,
    },

    #[error("resource exhausted in '{capability}': {message}")]
    ResourceExhausted { capability: String, message: String },

    #[error(transparent)]
    BindingConflict(#[from] ContextError),
}

impl StepError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StepError::Resolution(_) => ErrorKind::Resolution,
            StepError::CapabilityNotFound(_) | StepError::BindingConflict(_) => {
                ErrorKind::Configuration
            }
            StepError::Invocation { .. } => ErrorKind::Invocation,
            StepError::BreakerOpen { .. } => ErrorKind::BreakerOpen,
            StepError::Timeout { .. } => ErrorKind::Timeout,
            StepError::ResourceExhausted { .. } => ErrorKind::ResourceExhaustion,
        }
    }
}
