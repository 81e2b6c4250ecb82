mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::{json, Value};
use stepflow::engine::{BreakerState, ErrorKind, PolicyOverride, StepStatus};
use stepflow::prelude::*;

/// `test.flaky` fails its first two calls, then succeeds after 50ms
fn flaky_registry() -> (CapabilityRegistry, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mut registry = builtins();
    registry.register(
        "test.flaky",
        capability_fn(move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    return Err(CapabilityError::new("upstream down"));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!({ "call": n + 1 }))
            }
        }),
    );
    (registry, calls)
}

fn config(integration: &str, policy: PolicyOverride) -> ResilienceConfig {
    let mut config = ResilienceConfig::default();
    config.integrations.insert(integration.to_string(), policy);
    config
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_then_allows_one_trial() {
    let (registry, calls) = flaky_registry();
    let scheduler = scheduler_with(
        registry,
        config(
            "test",
            PolicyOverride {
                minimum_calls: Some(2),
                error_threshold_percent: Some(50.0),
                reset_timeout_ms: Some(1_000),
                ..Default::default()
            },
        ),
    );
    let single = workflow("single", &[("call", "test.flaky", json!({}))]);
    let pair = workflow(
        "pair",
        &[("x", "test.flaky", json!({})), ("y", "test.flaky", json!({}))],
    );

    for _ in 0..2 {
        let result = scheduler.run(&single, Value::Null, RunOptions::default()).await.unwrap();
        assert_eq!(result.primary_failure.unwrap().kind, ErrorKind::Invocation);
    }
    assert_eq!(scheduler.resilience().guard("test").breaker().state(), BreakerState::Open);

    // Open: fails fast without reaching the capability
    let result = scheduler.run(&single, Value::Null, RunOptions::default()).await.unwrap();
    assert_eq!(result.primary_failure.unwrap().kind, ErrorKind::BreakerOpen);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    tokio::time::advance(Duration::from_millis(1_000)).await;
    assert_eq!(
        scheduler.resilience().guard("test").breaker().state(),
        BreakerState::HalfOpen
    );

    // Half-open: exactly one of two concurrent calls is let through
    let result = scheduler.run(&pair, Value::Null, RunOptions::default()).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let statuses: Vec<StepStatus> = result.steps.iter().map(|s| s.status).collect();
    assert_eq!(statuses, vec![StepStatus::Success, StepStatus::Failed]);
    assert_eq!(result.step("y").unwrap().error.as_ref().unwrap().kind, ErrorKind::BreakerOpen);

    // The successful trial closed the breaker
    assert_eq!(scheduler.resilience().guard("test").breaker().state(), BreakerState::Closed);
    let result = scheduler.run(&single, Value::Null, RunOptions::default()).await.unwrap();
    assert!(result.success());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_reported_per_step() {
    let scheduler = scheduler_with(
        builtins(),
        config(
            "core",
            PolicyOverride {
                timeout_ms: Some(100),
                ..Default::default()
            },
        ),
    );
    let wf = workflow("slow", &[delay_step("slow", 5_000), delay_step("quick", 10)]);

    let start = tokio::time::Instant::now();
    let result = scheduler.run(&wf, Value::Null, RunOptions::default()).await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(result.step("quick").unwrap().status, StepStatus::Success);
    let slow = result.step("slow").unwrap();
    assert_eq!(slow.error.as_ref().unwrap().kind, ErrorKind::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_limiter_serializes_integration_calls() {
    let scheduler = scheduler_with(
        builtins(),
        config(
            "core",
            PolicyOverride {
                max_concurrent: Some(1),
                ..Default::default()
            },
        ),
    );
    let wf = workflow(
        "serial",
        &[delay_step("a", 100), delay_step("b", 100), delay_step("c", 100)],
    );

    let start = tokio::time::Instant::now();
    let result = scheduler.run(&wf, Value::Null, RunOptions::default()).await.unwrap();

    assert!(result.success());
    assert_eq!(result.waves.len(), 1);
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_min_spacing_between_starts() {
    let scheduler = scheduler_with(
        builtins(),
        config(
            "core",
            PolicyOverride {
                min_spacing_ms: Some(200),
                ..Default::default()
            },
        ),
    );
    let wf = workflow(
        "spaced",
        &[
            ("a", "core.echo", json!({})),
            ("b", "core.echo", json!({})),
            ("c", "core.echo", json!({})),
        ],
    );

    let start = tokio::time::Instant::now();
    let result = scheduler.run(&wf, Value::Null, RunOptions::default()).await.unwrap();

    assert!(result.success());
    assert!(start.elapsed() >= Duration::from_millis(400));
}

#[tokio::test]
async fn test_exhausted_capability_is_resource_exhaustion() {
    let scheduler = default_scheduler();
    let wf = workflow(
        "pool",
        &[("db", "core.fail", json!({ "message": "pool timed out", "exhausted": true }))],
    );

    let result = scheduler.run(&wf, Value::Null, RunOptions::default()).await.unwrap();
    assert_eq!(
        result.primary_failure.unwrap().kind,
        ErrorKind::ResourceExhaustion
    );
}

#[tokio::test]
async fn test_snapshot_lists_used_integrations() {
    let scheduler = default_scheduler();
    let wf = workflow("echo", &[("a", "core.echo", json!({}))]);
    scheduler.run(&wf, Value::Null, RunOptions::default()).await.unwrap();

    let snapshot = scheduler.resilience().snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].integration, "core");
    assert_eq!(snapshot[0].state, BreakerState::Closed);
    assert!(scheduler.resilience().degraded().is_empty());
}
