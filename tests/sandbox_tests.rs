mod common;

use std::time::{Duration, Instant};

use common::*;
use serde_json::{json, Value};
use stepflow::engine::{ErrorKind, StepStatus};
use stepflow::prelude::*;

const ECHO_WAT: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "alloc") (param i32) (result i32) i32.const 1024)
      (func (export "run") (param $ptr i32) (param $len i32) (result i64)
        (i64.or
          (i64.shl (i64.extend_i32_u (local.get $ptr)) (i64.const 32))
          (i64.extend_i32_u (local.get $len)))))
"#;

const LOOP_WAT: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "alloc") (param i32) (result i32) i32.const 0)
      (func (export "run") (param i32 i32) (result i64)
        (loop $forever (br $forever))
        i64.const 0))
"#;

fn sandboxed_scheduler(config: SandboxConfig) -> WaveScheduler {
    let registry = builtin_registry(&config).unwrap();
    scheduler_with(registry, ResilienceConfig::default())
}

async fn run_script(scheduler: &WaveScheduler, source: &str, input: Value) -> RunResult {
    let wf = workflow(
        "script",
        &[("script", "script.run", json!({ "source": source, "input": input }))],
    );
    scheduler.run(&wf, Value::Null, RunOptions::default()).await.unwrap()
}

fn failure_message(result: &RunResult) -> String {
    let step = result.step("script").unwrap();
    assert_eq!(step.status, StepStatus::Failed);
    step.error.as_ref().unwrap().message.clone()
}

#[tokio::test]
async fn test_script_output_feeds_later_steps() {
    let scheduler = sandboxed_scheduler(SandboxConfig::default());
    let wf = workflow(
        "pipeline",
        &[
            ("data", "core.echo", json!({ "items": [1, 2, 3] })),
            ("script", "script.run", json!({ "source": ECHO_WAT, "input": "{{data}}" })),
            ("pick", "core.echo", json!({ "last": "{{script.items[2]}}" })),
        ],
    );

    let result = scheduler.run(&wf, Value::Null, RunOptions::default()).await.unwrap();
    assert!(result.success());
    assert_eq!(result.step("script").unwrap().output, Some(json!({ "items": [1, 2, 3] })));
    assert_eq!(result.step("pick").unwrap().output, Some(json!({ "last": 3 })));
}

#[tokio::test]
async fn test_infinite_loop_hits_wall_clock_budget() {
    let scheduler = sandboxed_scheduler(SandboxConfig {
        timeout_ms: 200,
        max_fuel: None,
        ..Default::default()
    });

    let start = Instant::now();
    let result = run_script(&scheduler, LOOP_WAT, Value::Null).await;

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(failure_message(&result).contains("wall-clock budget"));
}

#[tokio::test]
async fn test_fuel_cap_stops_loop() {
    let scheduler = sandboxed_scheduler(SandboxConfig {
        max_fuel: Some(10_000),
        ..Default::default()
    });

    let result = run_script(&scheduler, LOOP_WAT, Value::Null).await;
    assert!(failure_message(&result).contains("ran out of fuel"));
}

#[tokio::test]
async fn test_host_imports_are_denied() {
    let scheduler = sandboxed_scheduler(SandboxConfig::default());
    let source = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "alloc") (param i32) (result i32) i32.const 0)
          (func (export "run") (param i32 i32) (result i64) i64.const 0))
    "#;

    let result = run_script(&scheduler, source, Value::Null).await;
    assert!(failure_message(&result).contains("host imports are not available"));
    assert_eq!(
        result.primary_failure.unwrap().kind,
        ErrorKind::Invocation
    );
}

#[tokio::test]
async fn test_memory_cap_enforced() {
    let scheduler = sandboxed_scheduler(SandboxConfig {
        max_memory_bytes: 1024 * 1024,
        ..Default::default()
    });
    // 64 pages is 4 MiB
    let source = r#"
        (module
          (memory (export "memory") 64)
          (func (export "alloc") (param i32) (result i32) i32.const 0)
          (func (export "run") (param i32 i32) (result i64) i64.const 0))
    "#;

    let result = run_script(&scheduler, source, Value::Null).await;
    assert!(failure_message(&result).contains("failed to instantiate"));
}

#[tokio::test]
async fn test_trap_is_reported() {
    let scheduler = sandboxed_scheduler(SandboxConfig::default());
    let source = r#"
        (module
          (memory (export "memory") 1)
          (func (export "alloc") (param i32) (result i32) i32.const 0)
          (func (export "run") (param i32 i32) (result i64) unreachable))
    "#;

    let result = run_script(&scheduler, source, Value::Null).await;
    assert!(failure_message(&result).contains("script trapped"));
}

#[tokio::test]
async fn test_script_files_never_leak_host_contents() {
    let dir = create_test_dir();
    let scripts = dir.path().join("scripts");
    std::fs::create_dir(&scripts).unwrap();
    std::fs::write(dir.path().join("app.env"), "db_password=SECRET-LINE\n").unwrap();
    std::fs::write(scripts.join("notes.wat"), "db_password=SECRET-LINE\n").unwrap();

    let scheduler = sandboxed_scheduler(SandboxConfig {
        script_dir: Some(scripts),
        ..Default::default()
    });

    for path in ["../app.env", "notes.wat"] {
        let wf = workflow("script", &[("script", "script.run", json!({ "path": path }))]);
        let result = scheduler.run(&wf, Value::Null, RunOptions::default()).await.unwrap();
        let message = failure_message(&result);
        assert!(!message.contains("SECRET-LINE"), "{}", message);
    }
}
