//! Step dependency graph
//!
//! Step B depends on step A when any placeholder in B's inputs is rooted at
//! A's output binding. Waves are computed with Kahn's algorithm: wave 0 holds
//! the steps with no dependencies, and each later step lands one wave after
//! its latest dependency.

use std::collections::HashMap;

use super::error::ConfigurationError;
use crate::workflow::{placeholder, StepDefinition};

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Step ids in definition order
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    waves: Vec<Vec<String>>,
    wave_index: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn build(steps: &[StepDefinition]) -> Result<Self, ConfigurationError> {
        let producers: HashMap<&str, &str> = steps
            .iter()
            .map(|s| (s.output_binding.as_str(), s.id.as_str()))
            .collect();

        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        for step in steps {
            let placeholders = placeholder::scan(&step.inputs).map_err(|e| {
                ConfigurationError::InvalidPlaceholder {
                    step: step.id.clone(),
                    reason: e.to_string(),
                }
            })?;

            let mut deps: Vec<String> = Vec::new();
            for p in placeholders {
                if let Some(&producer) = producers.get(p.path.root.as_str()) {
                    if !deps.iter().any(|d| d == producer) {
                        deps.push(producer.to_string());
                    }
                }
            }
            dependencies.insert(step.id.clone(), deps);
        }

        let order: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
        let waves = Self::compute_waves(&order, &dependencies)?;

        let wave_index = waves
            .iter()
            .enumerate()
            .flat_map(|(i, wave)| wave.iter().map(move |id| (id.clone(), i)))
            .collect();

        Ok(Self {
            order,
            dependencies,
            waves,
            wave_index,
        })
    }

    fn compute_waves(
        order: &[String],
        dependencies: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<Vec<String>>, ConfigurationError> {
        let position: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for id in order {
            let deps = dependencies.get(id).map(Vec::as_slice).unwrap_or_default();
            in_degree.insert(id.as_str(), deps.len());
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        let mut waves: Vec<Vec<String>> = Vec::new();
        let mut current: Vec<&str> = order
            .iter()
            .map(String::as_str)
            .filter(|id| in_degree.get(id) == Some(&0))
            .collect();
        let mut scheduled = 0;

        while !current.is_empty() {
            scheduled += current.len();

            let mut next = Vec::new();
            for id in &current {
                for &dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }
            next.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));

            waves.push(current.iter().map(|s| s.to_string()).collect());
            current = next;
        }

        if scheduled != order.len() {
            let steps = order
                .iter()
                .filter(|id| in_degree.get(id.as_str()).is_some_and(|&d| d > 0))
                .cloned()
                .collect();
            return Err(ConfigurationError::CyclicDependency { steps });
        }

        Ok(waves)
    }

    /// Waves in execution order, steps within a wave in definition order
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Zero-based wave index of a step
    pub fn wave_of(&self, step_id: &str) -> Option<usize> {
        self.wave_index.get(step_id).copied()
    }

    pub fn dependencies_of(&self, step_id: &str) -> &[String] {
        self.dependencies
            .get(step_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn step_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str, inputs: serde_json::Value) -> StepDefinition {
        StepDefinition::new(id, "core.echo", inputs)
    }

    #[test]
    fn test_independent_steps_share_wave() {
        let graph = DependencyGraph::build(&[
            step("a", json!({})),
            step("b", json!({ "x": "{{trigger.value}}" })),
            step("c", json!({})),
        ])
        .unwrap();

        assert_eq!(graph.waves(), &[vec!["a", "b", "c"]]);
        assert!(graph.dependencies_of("b").is_empty());
    }

    #[test]
    fn test_diamond() {
        let graph = DependencyGraph::build(&[
            step("d", json!({ "l": "{{b}}", "r": "{{c.out}}" })),
            step("b", json!({ "v": "{{a.x}}" })),
            step("c", json!({ "v": ["{{a.y}}", "{{a.z}}"] })),
            step("a", json!({})),
        ])
        .unwrap();

        assert_eq!(
            graph.waves(),
            &[vec!["a"], vec!["b", "c"], vec!["d"]]
        );
        assert_eq!(graph.dependencies_of("c"), &["a".to_string()]);
        assert_eq!(graph.wave_of("d"), Some(2));
    }

    #[test]
    fn test_output_binding_drives_edges() {
        let graph = DependencyGraph::build(&[
            step("draft", json!({})).output_as("article"),
            step("publish", json!({ "body": "By me: {{article.text}}" })),
            step("other", json!({ "x": "{{draft.text}}" })),
        ])
        .unwrap();

        assert_eq!(graph.dependencies_of("publish"), &["draft".to_string()]);
        // "draft" is a step id, not a binding
        assert!(graph.dependencies_of("other").is_empty());
    }

    #[test]
    fn test_mutual_reference_is_cycle() {
        let result = DependencyGraph::build(&[
            step("a", json!({ "x": "{{b.v}}" })),
            step("b", json!({ "x": "{{a.v}}" })),
            step("c", json!({})),
        ]);

        match result {
            Err(ConfigurationError::CyclicDependency { steps }) => {
                assert_eq!(steps, vec!["a", "b"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_cycle() {
        assert!(matches!(
            DependencyGraph::build(&[step("a", json!({ "x": "{{a}}" }))]),
            Err(ConfigurationError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_empty_plan() {
        let graph = DependencyGraph::build(&[]).unwrap();
        assert!(graph.is_empty());
        assert!(graph.waves().is_empty());
    }
}
