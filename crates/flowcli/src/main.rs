// crates/flowcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{
    json_object, ExecutionEvent, ExecutionStatus, Flow, Step, StepEvent, StepType, TriggerKind,
};
use flowruntime::{AppRegistry, CycleReport, FlowRuntime, RuntimeConfig};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one cycle of a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Test run: newest item only, dedup state untouched
        #[arg(short, long)]
        test: bool,

        /// Stop a test run after this step
        #[arg(long, requires = "test")]
        until_step: Option<Uuid>,

        /// Webhook payload as JSON string, for webhook-triggered flows
        #[arg(short, long)]
        payload: Option<String>,
    },

    /// Poll a flow on its trigger's interval until interrupted
    Poll {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List installed apps
    Apps,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            test,
            until_step,
            payload,
        } => run_flow(&file, test, until_step, payload).await?,
        Commands::Poll { file } => poll_flow(&file).await?,
        Commands::Validate { file } => validate_flow(&file)?,
        Commands::Apps => list_apps(),
        Commands::Init { output } => create_example_flow(&output)?,
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn registry() -> AppRegistry {
    let mut registry = AppRegistry::new();
    flowapps::register_all(&mut registry);
    registry
}

fn load(file: &Path) -> Result<Flow> {
    println!("🚀 Loading flow from: {}", file.display());
    let flow = flowruntime::load_file(file)
        .with_context(|| format!("failed to load {}", file.display()))?;

    println!("📋 Flow: {}", flow.name);
    println!("   Steps: {}", flow.steps.len());
    println!();
    Ok(flow)
}

async fn run_flow(
    file: &Path,
    test: bool,
    until_step: Option<Uuid>,
    payload: Option<String>,
) -> Result<()> {
    let flow = load(file)?;
    let runtime = FlowRuntime::with_config(registry(), RuntimeConfig::from_env());
    let printer = print_events(&runtime);
    let flow_id = runtime.register_flow(flow).await?;

    let report = match payload {
        Some(payload) => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload must be valid JSON")?;
            runtime.activate(flow_id).await?;
            runtime.handle_webhook(flow_id, payload).await?
        }
        None if test => runtime.test_run(flow_id, until_step).await?,
        None => runtime.run_flow(flow_id).await?,
    };

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    printer.abort();

    print_summary(&runtime, &report).await?;
    if !report.succeeded() {
        let failed = report
            .executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Failed)
            .count();
        bail!("{} execution(s) failed", failed);
    }
    Ok(())
}

async fn poll_flow(file: &Path) -> Result<()> {
    let flow = load(file)?;
    let registry = registry();
    let trigger_step = flow.trigger()?;
    if registry.trigger(&trigger_step.app_key, &trigger_step.key)?.kind() == TriggerKind::Webhook {
        bail!("flow '{}' is webhook-triggered; serve it with flowserver instead", flow.name);
    }

    let runtime = FlowRuntime::with_config(registry, RuntimeConfig::from_env());
    let printer = print_events(&runtime);
    let flow_id = runtime.register_flow(flow).await?;
    runtime.activate(flow_id).await?;
    println!("⏱️  Polling flow {} (Ctrl+C to stop)", flow_id);

    tokio::signal::ctrl_c().await?;
    tracing::info!(%flow_id, "interrupted, stopping poll loop");
    runtime.shutdown();
    printer.abort();

    let executions = runtime.executions(flow_id).await?;
    let failed = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Failed)
        .count();
    println!();
    println!("📊 {} executions, {} failed", executions.len(), failed);
    Ok(())
}

/// Print runtime events as they arrive
fn print_events(runtime: &FlowRuntime) -> JoinHandle<()> {
    let mut events = runtime.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::CycleStarted { test_run, .. } => {
                    if test_run {
                        println!("▶️  Test run started");
                    } else {
                        println!("▶️  Cycle started");
                    }
                }
                ExecutionEvent::StepStarted { step_id, app_key, key, position, .. } => {
                    println!("  ⚡ Step {} {}.{} ({})", position, app_key, key, step_id);
                }
                ExecutionEvent::StepCompleted { step_id, duration_ms, .. } => {
                    println!("  ✅ Step {} completed in {}ms", step_id, duration_ms);
                }
                ExecutionEvent::StepFailed { step_id, error, .. } => {
                    println!("  ❌ Step {} failed: {}", step_id, error);
                }
                ExecutionEvent::StepEvent { step_id, event, .. } => match event {
                    StepEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", step_id, message);
                    }
                    StepEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", step_id, message);
                    }
                    StepEvent::Progress { percent, message } => match message {
                        Some(msg) => println!("     📊 [{}] {}% - {}", step_id, percent, msg),
                        None => println!("     📊 [{}] {}%", step_id, percent),
                    },
                },
                ExecutionEvent::ExecutionCompleted { execution_id, status, duration_ms, .. } => {
                    match status {
                        ExecutionStatus::Succeeded => {
                            println!("✨ Execution {} succeeded in {}ms", execution_id, duration_ms)
                        }
                        _ => println!("💥 Execution {} failed after {}ms", execution_id, duration_ms),
                    }
                }
                ExecutionEvent::CycleCompleted { emitted, processed, skipped, .. } => {
                    println!(
                        "🔁 Cycle done: {} emitted, {} processed, {} skipped",
                        emitted, processed, skipped
                    );
                }
                ExecutionEvent::ExecutionStarted { .. } => {}
            }
        }
    })
}

async fn print_summary(runtime: &FlowRuntime, report: &CycleReport) -> Result<()> {
    println!();
    println!("📊 Cycle Summary:");
    println!("   Executions: {}", report.executions.len());
    println!("   Items emitted: {}, skipped: {}", report.emitted, report.skipped);
    if let Some(cursor) = &report.advanced_to {
        println!("   Last internal id: {}", cursor);
    }
    if let Some(error) = &report.trigger_error {
        println!("   Trigger error: {}", serde_json::Value::Object(error.clone()));
    }

    for execution in &report.executions {
        let (_, steps) = runtime.execution(execution.id).await?;
        println!();
        println!("📤 Execution {} ({:?}):", execution.id, execution.status);
        for step in steps {
            println!("   {} {:?}", step.position, step.status);
            if !step.data_out.is_empty() {
                println!("     out: {}", serde_json::Value::Object(step.data_out));
            }
            if !step.error_details.is_empty() {
                println!("     error: {}", serde_json::Value::Object(step.error_details));
            }
        }
    }
    Ok(())
}

fn validate_flow(file: &Path) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let flow = flowruntime::load_file(file)?;
    registry().validate_flow(&flow)?;

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.name);
    for step in flow.ordered_steps() {
        println!("   {}. {}.{}", step.position, step.app_key, step.key);
    }
    Ok(())
}

fn list_apps() {
    println!("📦 Installed Apps:");
    println!();

    let registry = registry();
    for key in registry.list_apps() {
        let Some(metadata) = registry.get_metadata(&key) else {
            continue;
        };
        println!("  • {} ({})", metadata.name, metadata.key);
        for trigger in &metadata.triggers {
            println!("    trigger {}: {}", trigger.key, trigger.description);
        }
        for action in &metadata.actions {
            println!("    action  {}: {}", action.key, action.description);
        }
    }
}

fn create_example_flow(output: &Path) -> Result<()> {
    let mut flow = Flow::new("Example HTTP Flow", "local");

    flow.add_step(
        Step::new(StepType::Trigger, "scheduler", "every_interval")
            .with_name("Every hour")
            .with_parameters(json_object(json!({ "interval": "1h" }))),
    );
    flow.add_step(
        Step::new(StepType::Action, "http", "send_request")
            .with_name("Fetch Data")
            .with_parameters(json_object(json!({
                "method": "GET",
                "url": "https://api.github.com/zen",
            }))),
    );
    flow.add_step(
        Step::new(StepType::Action, "debug", "log")
            .with_name("Log Response")
            .with_parameter("message", "{{ previous.body }}"),
    );

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --file {} --test", output.display());

    Ok(())
}
