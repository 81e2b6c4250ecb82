//! Execution context for workflow runtime
//!
//! Maps binding names to step outputs. Each binding is written once and read
//! by any number of later steps. A fresh context is created per run.

use std::collections::HashMap;

use serde_json::Value;

/// Reserved binding holding the trigger payload
pub const TRIGGER_BINDING: &str = "trigger";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ContextError {
    #[error("binding '{0}' is already bound")]
    AlreadyBound(String),
}

/// Runtime context for placeholder resolution
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Run ID
    pub run_id: String,

    bindings: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Create a new execution context with a generated run ID
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        }
    }

    /// Create a context seeded with the trigger payload
    pub fn with_trigger(run_id: impl Into<String>, trigger: Value) -> Self {
        let mut bindings = HashMap::new();
        bindings.insert(TRIGGER_BINDING.to_string(), trigger);
        Self {
            run_id: run_id.into(),
            bindings,
        }
    }

    /// Bind a value; fails if the name already holds one
    pub fn bind(&mut self, name: &str, value: Value) -> Result<(), ContextError> {
        if self.bindings.contains_key(name) {
            return Err(ContextError::AlreadyBound(name.to_string()));
        }
        self.bindings.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Snapshot of all bindings as one JSON object
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.bindings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for ExecutionContext {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            bindings: iter.into_iter().collect(),
        }
    }
}
