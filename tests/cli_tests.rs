mod common;

use common::*;
use serde_json::{json, Value};
use std::path::Path;
use std::process::{Command, Output};

fn cli_command(dir: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_stepflow"));
    command.current_dir(dir).env_remove("STEPFLOW_CONFIG");
    command
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn write_sqlite_config(dir: &Path) {
    std::fs::write(
        dir.join("stepflow.yaml"),
        "database:\n  type: sqlite\n  path: data/stepflow.db\n",
    )
    .unwrap();
}

#[test]
fn test_cli_help() {
    let dir = create_test_dir();
    let output = cli_command(dir.path()).arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("Run and queue dependency-ordered workflows"));
    for command in ["run", "plan", "validate", "worker", "enqueue", "cancel", "capacity"] {
        assert!(stdout.contains(command), "missing {}", command);
    }
}

#[test]
fn test_cli_version() {
    let dir = create_test_dir();
    let output = cli_command(dir.path()).arg("--version").output().unwrap();

    assert!(output.status.success());
    assert!(stdout(&output).contains("stepflow"));
}

#[test]
fn test_cli_worker_help() {
    let dir = create_test_dir();
    let output = cli_command(dir.path()).args(["worker", "--help"]).output().unwrap();

    assert!(output.status.success());
    let stdout = stdout(&output);
    assert!(stdout.contains("Process queued jobs until interrupted"));
    assert!(stdout.contains("--workflows"));
    assert!(stdout.contains("--concurrency"));
    assert!(stdout.contains("--schedule"));
}

#[test]
fn test_cli_run_success() {
    let dir = create_test_dir();
    write_workflow(
        dir.path(),
        "greet.json",
        &json!({
            "id": "greet",
            "config": {
                "steps": [
                    { "id": "hello", "module": "core.echo", "inputs": { "text": "hi {{trigger.name}}" } }
                ],
                "returnValue": "{{hello.text}}"
            }
        })
        .to_string(),
    );

    let output = cli_command(dir.path())
        .args(["run", "greet.json", "--trigger", r#"{"name":"ada"}"#, "--events"])
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = stdout(&output);
    assert!(stdout.contains("Running workflow: greet"));
    assert!(stdout.contains("Status: success"));
    assert!(stdout.contains("Return value: \"hi ada\""));
}

#[test]
fn test_cli_run_failure_exit_code() {
    let dir = create_test_dir();
    write_workflow(
        dir.path(),
        "broken.json",
        &workflow_json(
            "broken",
            &[
                fail_step("broken"),
                ("after", "core.echo", json!({ "v": "{{broken}}" })),
            ],
        ),
    );

    let output = cli_command(dir.path()).args(["run", "broken.json"]).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout(&output);
    assert!(stdout.contains("Status: failed"));
    assert!(stdout.contains("after skipped"));
    assert!(stdout.contains("First failure: broken (invocation)"));
}

#[test]
fn test_cli_run_missing_file() {
    let dir = create_test_dir();
    let output = cli_command(dir.path()).args(["run", "nope.json"]).output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("Workflow file not found"));
}

#[test]
fn test_cli_run_bad_trigger() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "a.yaml", &yaml_workflow("a"));

    let output = cli_command(dir.path())
        .args(["run", "a.yaml", "--trigger", "{not json"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("invalid --trigger JSON"));
}

#[test]
fn test_cli_plan_shows_waves() {
    let dir = create_test_dir();
    write_workflow(
        dir.path(),
        "chain.json",
        &workflow_json(
            "chain",
            &[
                ("fetch", "core.echo", json!({ "n": 1 })),
                ("other", "core.echo", json!({})),
                ("report", "core.echo", json!({ "a": "{{fetch.n}}", "b": "{{other}}" })),
            ],
        ),
    );

    let output = cli_command(dir.path()).args(["plan", "chain.json"]).output().unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let stdout = stdout(&output);
    assert!(stdout.contains("Wave 0: [fetch, other]"));
    assert!(stdout.contains("Wave 1: [report]"));
    assert!(stdout.contains("report <- fetch, other"));
}

#[test]
fn test_cli_validate_directory() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "good.yaml", &yaml_workflow("good"));
    write_workflow(
        dir.path(),
        "cycle.json",
        &workflow_json(
            "cycle",
            &[
                ("a", "core.echo", json!({ "v": "{{b}}" })),
                ("b", "core.echo", json!({ "v": "{{a}}" })),
            ],
        ),
    );
    write_workflow(
        dir.path(),
        "unknown.json",
        &workflow_json("unknown", &[("a", "nope.missing", json!({}))]),
    );

    let output = cli_command(dir.path()).args(["validate", "."]).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stdout = stdout(&output);
    assert!(stdout.contains("✓ good (1 steps, 1 waves)"));
    assert!(stdout.contains("✗ cycle"));
    assert!(stdout.contains("✗ unknown"));
}

#[test]
fn test_cli_validate_single_file() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "good.yaml", &yaml_workflow("good"));

    let output = cli_command(dir.path()).args(["validate", "good.yaml"]).output().unwrap();

    assert!(output.status.success());
    assert!(stdout(&output).contains("✓ good"));
}

#[test]
fn test_cli_validate_nonexistent_path() {
    let dir = create_test_dir();
    let output = cli_command(dir.path())
        .args(["validate", "/nonexistent/path"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("Path not found"));
}

#[test]
fn test_cli_enqueue_requires_persistent_queue() {
    let dir = create_test_dir();
    let output = cli_command(dir.path()).args(["enqueue", "greet"]).output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("enqueue needs a persistent queue"));
}

#[test]
fn test_cli_enqueue_cancel_and_capacity() {
    let dir = create_test_dir();
    write_sqlite_config(dir.path());

    let output = cli_command(dir.path())
        .args([
            "enqueue",
            "greet",
            "--trigger",
            r#"{"name":"ada"}"#,
            "--options",
            r#"{"attempts":3,"delayMs":60000}"#,
        ])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let handle: Value = serde_json::from_str(&stdout(&output)).unwrap();
    let job_id = handle["id"].as_str().unwrap().to_string();

    let output = cli_command(dir.path()).arg("capacity").output().unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let report: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["queue"]["delayed"], json!(1));
    assert!(report["dbPool"]["maxConnections"].is_number());

    let output = cli_command(dir.path()).args(["cancel", &job_id]).output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains(&format!("Job {} cancelled", job_id)));

    let output = cli_command(dir.path()).args(["cancel", &job_id]).output().unwrap();
    assert!(stdout(&output).contains("already failed"));
}
