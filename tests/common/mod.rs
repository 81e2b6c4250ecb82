#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use stepflow::config::{QueueConfig, WorkerConfig};
use stepflow::prelude::*;
use stepflow::queue::QueueBackend;
use tempfile::TempDir;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_workflow(dir: &Path, filename: &str, content: &str) {
    fs::write(dir.join(filename), content).expect("Failed to write workflow file");
}

/// Workflow document with `(id, module, inputs)` steps
pub fn workflow_json(id: &str, steps: &[(&str, &str, Value)]) -> String {
    let steps: Vec<Value> = steps
        .iter()
        .map(|(step_id, module, inputs)| {
            json!({ "id": step_id, "module": module, "inputs": inputs })
        })
        .collect();
    json!({
        "id": id,
        "trigger": { "type": "manual" },
        "config": { "steps": steps }
    })
    .to_string()
}

pub fn workflow(id: &str, steps: &[(&str, &str, Value)]) -> WorkflowDefinition {
    WorkflowLoader::from_json(&workflow_json(id, steps)).expect("Failed to parse workflow")
}

pub fn delay_step(id: &str, ms: u64) -> (&str, &'static str, Value) {
    (id, "core.delay", json!({ "ms": ms, "value": id }))
}

pub fn fail_step(id: &str) -> (&str, &'static str, Value) {
    (id, "core.fail", json!({ "message": format!("{} failed", id) }))
}

pub fn builtins() -> CapabilityRegistry {
    builtin_registry(&SandboxConfig::default()).expect("Failed to build registry")
}

pub fn scheduler_with(registry: CapabilityRegistry, config: ResilienceConfig) -> WaveScheduler {
    WaveScheduler::new(Arc::new(registry), Arc::new(Resilience::new(config)))
}

pub fn default_scheduler() -> WaveScheduler {
    scheduler_with(builtins(), ResilienceConfig::default())
}

/// Registers `test.flaky`, which fails its first `failures` calls, and
/// returns the shared call counter
pub fn register_flaky(registry: &mut CapabilityRegistry, failures: u32) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    registry.register(
        "test.flaky",
        capability_fn(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < failures {
                    Err(CapabilityError::new(format!("flaky failure {}", n + 1)))
                } else {
                    Ok(json!({ "call": n + 1 }))
                }
            }
        }),
    );
    calls
}

/// Worker pool over `backend` serving `workflows` from memory
pub async fn pool_with(
    registry: CapabilityRegistry,
    workflows: Vec<WorkflowDefinition>,
    backend: Arc<dyn QueueBackend>,
) -> (WorkerPool, Arc<MemoryRunHistory>) {
    let store = MemoryWorkflowStore::new();
    for wf in workflows {
        store.insert(wf).await;
    }

    let history = Arc::new(MemoryRunHistory::new());
    let scheduler = scheduler_with(registry, ResilienceConfig::default());
    let processor = JobProcessor::new(scheduler, Arc::new(store), history.clone());
    let queue = JobQueue::new(backend, &QueueConfig::default());

    (WorkerPool::new(queue, processor, WorkerConfig::default()), history)
}

/// Minimal YAML workflow with a single echo step
pub fn yaml_workflow(id: &str) -> String {
    format!(
        r#"
id: {}
trigger:
  type: manual
config:
  steps:
    - id: say
      module: core.echo
      inputs:
        text: hello
"#,
        id
    )
}
