use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::Value;
use stepflow::engine::{validate as validate_plan, ProgressEvent, ProgressStatus, StepStatus};
use stepflow::prelude::*;
use stepflow::queue::JobState;
use stepflow::DatabaseConfig;
use stepflow::workflow::TriggerKind;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Run and queue dependency-ordered workflows", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to stepflow.yaml (default: ./stepflow.yaml if present)
    #[arg(short, long, global = true, env = "STEPFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single workflow file in this process
    Run {
        /// Path to the workflow JSON or YAML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Trigger payload as JSON
        #[arg(short, long)]
        trigger: Option<String>,

        /// Print each step event as it happens
        #[arg(short, long)]
        events: bool,
    },

    /// Show the wave layout of a workflow without running it
    Plan {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Validate workflow files without running them
    Validate {
        /// Path to workflow file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Process queued jobs until interrupted
    Worker {
        /// Directory holding the workflow definitions
        #[arg(short, long, value_name = "DIR")]
        workflows: PathBuf,

        /// Worker slots (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Enqueue a repeating job for every cron-triggered workflow at startup
        #[arg(long)]
        schedule: bool,
    },

    /// Add a job to the queue
    Enqueue {
        #[arg(value_name = "WORKFLOW_ID")]
        workflow_id: String,

        /// Trigger payload as JSON
        #[arg(short, long)]
        trigger: Option<String>,

        /// Job options as JSON, e.g. '{"attempts":3,"backoff":{"type":"fixed","delay":1000}}'
        #[arg(short, long)]
        options: Option<String>,
    },

    /// Cancel a queued or running job
    Cancel {
        #[arg(value_name = "JOB_ID")]
        job_id: uuid::Uuid,
    },

    /// Print pool, queue and integration utilization
    Capacity,
}

#[cfg(feature = "otel")]
fn init_otel_tracing(verbose: bool) {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::TracerProvider;

    let filter = if verbose {
        "stepflow=debug"
    } else {
        "stepflow=info"
    };

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()
        .expect("Failed to create OTLP exporter");

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .build();

    let tracer = provider.tracer("stepflow");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .init();

    opentelemetry::global::set_tracer_provider(provider);
}

#[cfg(not(feature = "otel"))]
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "stepflow=debug"
    } else {
        "stepflow=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "otel")]
    init_otel_tracing(cli.verbose);

    #[cfg(not(feature = "otel"))]
    init_tracing(cli.verbose);

    let result = run(cli).await;

    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "stepflow failed");
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = EngineConfig::discover(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            trigger,
            events,
        } => run_single(&config, file, trigger.as_deref(), events).await,
        Commands::Plan { file } => plan(&config, file),
        Commands::Validate { path } => validate(&config, path),
        Commands::Worker {
            workflows,
            concurrency,
            schedule,
        } => run_worker(config, workflows, concurrency, schedule).await,
        Commands::Enqueue {
            workflow_id,
            trigger,
            options,
        } => enqueue(&config, &workflow_id, trigger.as_deref(), options.as_deref()).await,
        Commands::Cancel { job_id } => cancel(&config, job_id).await,
        Commands::Capacity => capacity(&config).await,
    }
}

fn parse_trigger(trigger: Option<&str>) -> anyhow::Result<Value> {
    match trigger {
        Some(json) => serde_json::from_str(json).context("invalid --trigger JSON"),
        None => Ok(Value::Null),
    }
}

fn scheduler(config: &EngineConfig) -> anyhow::Result<WaveScheduler> {
    let registry = Arc::new(builtin_registry(&config.sandbox)?);
    let resilience = Arc::new(Resilience::new(config.resilience.clone()));
    Ok(WaveScheduler::new(registry, resilience))
}

fn load(file: &Path) -> anyhow::Result<WorkflowDefinition> {
    if !file.exists() {
        anyhow::bail!("Workflow file not found: {}", file.display());
    }
    Ok(WorkflowLoader::load_file(file)?)
}

async fn run_single(
    config: &EngineConfig,
    file: PathBuf,
    trigger: Option<&str>,
    events: bool,
) -> anyhow::Result<bool> {
    let workflow = load(&file)?;
    let trigger = parse_trigger(trigger)?;
    let scheduler = scheduler(config)?;

    println!("Running workflow: {} ({})\n", workflow.name, file.display());

    let (progress, receiver) = ProgressSink::unbounded();
    let printer = tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            if events {
                print_event(&event);
            }
        }
    });

    let options = RunOptions {
        progress,
        ..Default::default()
    };

    let cancel = options.cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling at the next wave boundary...");
            cancel.cancel();
        }
    });

    let result = scheduler.run(&workflow, trigger, options).await;
    ctrl_c.abort();
    let _ = printer.await;
    let result = result?;

    let backends = Backends::open(&config.database).await?;
    let record = stepflow::engine::RunRecord::from_result(&result, workflow.fingerprint(), None, 1)?;
    backends.history.record(record).await?;

    print_run_result(&result);
    Ok(result.success())
}

fn plan(config: &EngineConfig, file: PathBuf) -> anyhow::Result<bool> {
    let workflow = load(&file)?;
    let plan = scheduler(config)?.plan(&workflow)?;

    println!("Workflow: {} ({} steps)\n", workflow.name, plan.steps.len());
    for (i, wave) in plan.waves().iter().enumerate() {
        println!("  Wave {}: [{}]", i, wave.join(", "));
    }
    for step in &plan.steps {
        let deps = plan.graph.dependencies_of(&step.id);
        if !deps.is_empty() {
            println!("  {} <- {}", step.id, deps.join(", "));
        }
    }
    Ok(true)
}

fn validate(config: &EngineConfig, path: PathBuf) -> anyhow::Result<bool> {
    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }

    let workflows = if path.is_dir() {
        WorkflowLoader::load_directory(&path)?
    } else {
        vec![WorkflowLoader::load_file(&path)?]
    };

    if workflows.is_empty() {
        println!("No workflows found in: {}", path.display());
        return Ok(true);
    }

    let registry = builtin_registry(&config.sandbox)?;
    let mut valid = true;
    for workflow in &workflows {
        match validate_plan(workflow, Some(&registry))
            .and_then(|steps| stepflow::engine::DependencyGraph::build(&steps))
        {
            Ok(graph) => println!(
                "✓ {} ({} steps, {} waves)",
                workflow.id,
                graph.len(),
                graph.waves().len()
            ),
            Err(e) => {
                println!("✗ {}: {}", workflow.id, e);
                valid = false;
            }
        }
    }
    Ok(valid)
}

fn job_queue(config: &EngineConfig, backends: &Backends) -> JobQueue {
    JobQueue::new(backends.queue.clone(), &config.queue)
}

#[tracing::instrument(skip(config, concurrency), fields(workflows_dir = %workflows.display()))]
async fn run_worker(
    mut config: EngineConfig,
    workflows: PathBuf,
    concurrency: Option<usize>,
    schedule: bool,
) -> anyhow::Result<bool> {
    if !workflows.is_dir() {
        anyhow::bail!("Directory not found: {}", workflows.display());
    }
    if let Some(n) = concurrency {
        config.workers.concurrency = n;
    }

    let backends = Backends::open(&config.database).await?;
    let queue = job_queue(&config, &backends);
    let store = Arc::new(DirectoryWorkflowStore::new(&workflows));

    if schedule {
        for workflow in store.list().await? {
            if workflow.trigger.kind != TriggerKind::Cron {
                continue;
            }
            let Some(pattern) = workflow.trigger.cron_pattern() else {
                continue;
            };
            let options = JobOptions {
                repeat: Some(stepflow::queue::Repeat {
                    pattern: pattern.to_string(),
                    limit: None,
                }),
                ..config.queue.default_options.clone()
            };
            let handle = queue
                .enqueue_workflow(&workflow.id, Value::Null, Some(options))
                .await?;
            println!("Scheduled {} ({}), first run at {}", workflow.id, pattern, handle.run_at);
        }
    }

    let processor = JobProcessor::new(scheduler(&config)?, store, backends.history.clone());
    let pool = WorkerPool::new(queue, processor, config.workers.clone());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            signal.cancel();
        }
    });

    pool.run(shutdown).await;
    if let Some(db) = &backends.database {
        db.close().await;
    }
    Ok(true)
}

async fn enqueue(
    config: &EngineConfig,
    workflow_id: &str,
    trigger: Option<&str>,
    options: Option<&str>,
) -> anyhow::Result<bool> {
    if matches!(config.database, DatabaseConfig::Memory) {
        anyhow::bail!("enqueue needs a persistent queue; set `database: {{ type: sqlite }}` in stepflow.yaml");
    }

    let trigger = parse_trigger(trigger)?;
    let options: Option<JobOptions> = options
        .map(serde_json::from_str)
        .transpose()
        .context("invalid --options JSON")?;

    let backends = Backends::open(&config.database).await?;
    let handle = job_queue(config, &backends)
        .enqueue_workflow(workflow_id, trigger, options)
        .await?;

    println!("{}", serde_json::to_string_pretty(&handle)?);
    Ok(true)
}

async fn cancel(config: &EngineConfig, job_id: uuid::Uuid) -> anyhow::Result<bool> {
    let backends = Backends::open(&config.database).await?;
    match job_queue(config, &backends).cancel(job_id).await? {
        Some(JobState::Waiting) => println!("Job {job_id} cancelled"),
        Some(JobState::Active) => println!("Job {job_id} will stop at its next wave boundary"),
        Some(state) => println!("Job {job_id} already {}", state.as_str()),
        None => {
            println!("Job {job_id} not found");
            return Ok(false);
        }
    }
    Ok(true)
}

async fn capacity(config: &EngineConfig) -> anyhow::Result<bool> {
    let backends = Backends::open(&config.database).await?;
    let monitor = CapacityMonitor::new(
        job_queue(config, &backends),
        Arc::new(Resilience::new(config.resilience.clone())),
    )
    .with_database(backends.database.clone());

    let report = monitor.report().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(true)
}

fn print_event(event: &ProgressEvent) {
    let marker = match event.status {
        ProgressStatus::Resolving | ProgressStatus::Invoking => "…",
        ProgressStatus::Success => "✓",
        ProgressStatus::Failed => "✗",
        ProgressStatus::Skipped => "-",
    };
    match &event.error {
        Some(error) => println!("  {} {} {:?}: {}", marker, event.step_id, event.status, error),
        None => println!("  {} {} {:?}", marker, event.step_id, event.status),
    }
}

fn print_run_result(result: &RunResult) {
    println!("\n=== Run Result ===\n");
    println!("Status: {}", result.status.as_str());
    println!("Run ID: {}", result.run_id);
    println!("Duration: {}ms\n", result.duration_ms);

    for timing in &result.waves {
        println!("Wave {} ({}ms)", timing.index, timing.duration_ms);
        for id in &timing.steps {
            let Some(step) = result.step(id) else {
                continue;
            };
            let marker = if step.is_success() { "  ✓" } else { "  ✗" };
            println!("{} {} [{}] {}ms", marker, step.step_id, step.capability, step.duration_ms);
            if let Some(err) = &step.error {
                println!("      {}: {}", err.kind, err.message);
            }
        }
    }

    for step in result.steps.iter().filter(|s| s.status == StepStatus::Skipped) {
        println!("  - {} skipped", step.step_id);
    }

    if let Some(failure) = &result.primary_failure {
        println!("\nFirst failure: {} ({})", failure.step_id, failure.kind);
    }
    if let Some(value) = &result.return_value {
        println!("\nReturn value: {}", value);
    }
    if let Some(err) = &result.return_value_error {
        println!("\nReturn value error: {}", err);
    }
}
