//! Workflow and step definitions
//!
//! Definitions are authored externally (JSON or YAML) and treated as read-only
//! input for each run. The wire format nests the steps under `config`:
//!
//! ```json
//! {
//!   "id": "daily-digest",
//!   "name": "Daily digest",
//!   "trigger": { "type": "cron", "config": { "pattern": "0 8 * * *" } },
//!   "config": {
//!     "steps": [
//!       { "id": "fetch", "module": "http.request", "inputs": { "url": "{{trigger.feed}}" }, "outputAs": "feed" },
//!       { "id": "post", "module": "core.echo", "inputs": { "text": "Top: {{feed.body.items[0].title}}" } }
//!     ],
//!     "returnValue": "{{post}}"
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A complete workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WorkflowDocument", into = "WorkflowDocument")]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub trigger: Trigger,
    pub steps: Vec<StepDefinition>,
    /// Template resolved against the final context after a successful run
    pub return_value: Option<Value>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            trigger: Trigger::default(),
            steps,
            return_value: None,
        }
    }

    pub fn with_return_value(mut self, value: Value) -> Self {
        self.return_value = Some(value);
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// SHA-256 over the canonical JSON form, hex encoded
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

/// A single step: one capability invocation with templated inputs
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub id: String,
    /// Registered capability path, e.g. `http.request`
    pub capability: String,
    /// Raw input tree, possibly containing `{{...}}` placeholders
    pub inputs: Value,
    /// Context binding the step's output is written to
    pub output_binding: String,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, capability: impl Into<String>, inputs: Value) -> Self {
        let id = id.into();
        Self {
            output_binding: id.clone(),
            id,
            capability: capability.into(),
            inputs,
        }
    }

    pub fn output_as(mut self, binding: impl Into<String>) -> Self {
        self.output_binding = binding.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    #[default]
    Manual,
    Cron,
    Webhook,
}

/// How runs of a workflow are started
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(rename = "type", default)]
    pub kind: TriggerKind,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
}

impl Trigger {
    pub fn cron(pattern: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Cron,
            config: serde_json::json!({ "pattern": pattern.into() }),
        }
    }

    /// Cron pattern of a cron trigger (`config.pattern`, or `config.cron`)
    pub fn cron_pattern(&self) -> Option<&str> {
        if self.kind != TriggerKind::Cron {
            return None;
        }
        self.config
            .get("pattern")
            .or_else(|| self.config.get("cron"))
            .and_then(Value::as_str)
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkflowDocument {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    trigger: Trigger,
    config: WorkflowConfigDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowConfigDocument {
    #[serde(default)]
    steps: Vec<StepDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    return_value: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepDocument {
    id: String,
    module: String,
    #[serde(default = "empty_inputs")]
    inputs: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_as: Option<String>,
}

fn empty_inputs() -> Value {
    Value::Object(serde_json::Map::new())
}

impl From<WorkflowDocument> for WorkflowDefinition {
    fn from(doc: WorkflowDocument) -> Self {
        let steps = doc
            .config
            .steps
            .into_iter()
            .map(|s| StepDefinition {
                output_binding: s.output_as.unwrap_or_else(|| s.id.clone()),
                id: s.id,
                capability: s.module,
                inputs: s.inputs,
            })
            .collect();

        Self {
            name: doc.name.unwrap_or_else(|| doc.id.clone()),
            id: doc.id,
            trigger: doc.trigger,
            steps,
            return_value: doc.config.return_value,
        }
    }
}

impl From<WorkflowDefinition> for WorkflowDocument {
    fn from(def: WorkflowDefinition) -> Self {
        let steps = def
            .steps
            .into_iter()
            .map(|s| StepDocument {
                id: s.id,
                module: s.capability,
                inputs: s.inputs,
                output_as: Some(s.output_binding),
            })
            .collect();

        Self {
            id: def.id,
            name: Some(def.name),
            trigger: def.trigger,
            config: WorkflowConfigDocument {
                steps,
                return_value: def.return_value,
            },
        }
    }
}
