//! Plan validation
//!
//! Checks a workflow definition before anything runs and produces the
//! normalized step list the graph builder and scheduler work from.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::capability::CapabilityRegistry;
use super::error::ConfigurationError;
use crate::workflow::{placeholder, StepDefinition, WorkflowDefinition, TRIGGER_BINDING};

static CAPABILITY_PATH_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_-]*(\.[a-z][a-z0-9_-]*)+$").unwrap());

/// Whether `path` is a well-formed capability path like `http.request`
pub fn is_valid_capability_path(path: &str) -> bool {
    CAPABILITY_PATH_REGEX.is_match(path)
}

/// Validate a definition; `registry` enables the unknown-capability check
pub fn validate(
    workflow: &WorkflowDefinition,
    registry: Option<&CapabilityRegistry>,
) -> Result<Vec<StepDefinition>, ConfigurationError> {
    let mut ids: HashMap<&str, usize> = HashMap::new();
    let mut bindings: HashMap<&str, &str> = HashMap::new();

    for (position, step) in workflow.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(ConfigurationError::EmptyStepId(position));
        }
        if ids.insert(step.id.as_str(), position).is_some() {
            return Err(ConfigurationError::DuplicateStepId(step.id.clone()));
        }

        if step.output_binding == TRIGGER_BINDING {
            return Err(ConfigurationError::ReservedBinding {
                step: step.id.clone(),
                binding: step.output_binding.clone(),
            });
        }
        if let Some(first) = bindings.insert(step.output_binding.as_str(), step.id.as_str()) {
            return Err(ConfigurationError::DuplicateOutputBinding {
                binding: step.output_binding.clone(),
                first: first.to_string(),
                second: step.id.clone(),
            });
        }

        if !is_valid_capability_path(&step.capability) {
            return Err(ConfigurationError::InvalidCapabilityPath {
                step: step.id.clone(),
                path: step.capability.clone(),
            });
        }
        if let Some(registry) = registry {
            if !registry.contains(&step.capability) {
                return Err(ConfigurationError::UnknownCapability {
                    step: step.id.clone(),
                    path: step.capability.clone(),
                });
            }
        }

        placeholder::scan(&step.inputs).map_err(|e| ConfigurationError::InvalidPlaceholder {
            step: step.id.clone(),
            reason: e.to_string(),
        })?;
    }

    if let Some(template) = &workflow.return_value {
        placeholder::scan(template)
            .map_err(|e| ConfigurationError::InvalidReturnValue(e.to_string()))?;
    }

    if workflow.trigger.kind == crate::workflow::TriggerKind::Cron
        && workflow.trigger.cron_pattern().is_none()
    {
        return Err(ConfigurationError::InvalidTrigger(
            "cron trigger requires config.pattern".to_string(),
        ));
    }

    Ok(workflow.steps.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::capability::capability_fn;
    use crate::workflow::Trigger;
    use serde_json::json;

    fn step(id: &str, cap: &str, inputs: serde_json::Value) -> StepDefinition {
        StepDefinition::new(id, cap, inputs)
    }

    #[test]
    fn test_valid_plan_is_returned_in_order() {
        let wf = WorkflowDefinition::new(
            "wf",
            vec![
                step("a", "core.echo", json!({})),
                step("b", "core.echo", json!({ "x": "{{a.value}}" })),
            ],
        );
        let steps = validate(&wf, None).unwrap();
        let ids: Vec<_> = steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_capability_path_syntax() {
        assert!(is_valid_capability_path("http.request"));
        assert!(is_valid_capability_path("ai.text.generate"));
        assert!(is_valid_capability_path("google-sheets.append_row"));
        assert!(!is_valid_capability_path("http"));
        assert!(!is_valid_capability_path("Http.Request"));
        assert!(!is_valid_capability_path("http..request"));
        assert!(!is_valid_capability_path(".http"));
    }

    #[test]
    fn test_duplicate_ids_and_bindings() {
        let wf = WorkflowDefinition::new(
            "wf",
            vec![step("a", "core.echo", json!({})), step("a", "core.echo", json!({}))],
        );
        assert_eq!(
            validate(&wf, None),
            Err(ConfigurationError::DuplicateStepId("a".into()))
        );

        let wf = WorkflowDefinition::new(
            "wf",
            vec![
                step("a", "core.echo", json!({})).output_as("out"),
                step("b", "core.echo", json!({})).output_as("out"),
            ],
        );
        assert_eq!(
            validate(&wf, None),
            Err(ConfigurationError::DuplicateOutputBinding {
                binding: "out".into(),
                first: "a".into(),
                second: "b".into(),
            })
        );
    }

    #[test]
    fn test_reserved_binding_and_empty_id() {
        let wf = WorkflowDefinition::new(
            "wf",
            vec![step("a", "core.echo", json!({})).output_as("trigger")],
        );
        assert!(matches!(
            validate(&wf, None),
            Err(ConfigurationError::ReservedBinding { .. })
        ));

        let wf = WorkflowDefinition::new("wf", vec![step(" ", "core.echo", json!({}))]);
        assert_eq!(validate(&wf, None), Err(ConfigurationError::EmptyStepId(0)));
    }

    #[test]
    fn test_unknown_capability_with_registry() {
        let mut registry = CapabilityRegistry::new();
        registry.register("core.echo", capability_fn(|v| async move { Ok(v) }));

        let wf = WorkflowDefinition::new("wf", vec![step("a", "mail.send", json!({}))]);
        assert!(validate(&wf, None).is_ok());
        assert_eq!(
            validate(&wf, Some(&registry)),
            Err(ConfigurationError::UnknownCapability {
                step: "a".into(),
                path: "mail.send".into(),
            })
        );
    }

    #[test]
    fn test_bad_placeholder_and_trigger() {
        let wf = WorkflowDefinition::new(
            "wf",
            vec![step("a", "core.echo", json!({ "x": ["{{ a[ }}"] }))],
        );
        assert!(matches!(
            validate(&wf, None),
            Err(ConfigurationError::InvalidPlaceholder { .. })
        ));

        let mut wf = WorkflowDefinition::new("wf", vec![]);
        wf.trigger = Trigger {
            kind: crate::workflow::TriggerKind::Cron,
            config: json!({}),
        };
        assert!(matches!(
            validate(&wf, None),
            Err(ConfigurationError::InvalidTrigger(_))
        ));
    }
}
