//! CLI entry point for Neurodeck.
//!
//! This binary provides the `neurodeck` command with subcommands for running
//! the dispatcher against stdin signals, firing a one-shot trigger, listing
//! the registered workflows, and drilling every workflow end to end.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use neurodeck_capabilities::{Settings, standard_set};
use neurodeck_engine::{
    Dispatcher, RunStatus, Signal, StepStatus, WorkflowRegistry, WorkflowResult,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Neurodeck — signal-triggered action dispatcher.
#[derive(Parser)]
#[command(
    name = "neurodeck",
    version,
    about = "Neurodeck — signal-triggered action dispatcher",
    long_about = "Routes trigger signals from the deck's headset to built-in workflows \
                  (EMERGENCY, SNAPSHOT, MESSAGE, STRESS_RELIEF), one at a time, with \
                  spoken feedback and a journaled record per signal."
)]
struct Cli {
    /// Settings file (defaults to ./neurodeck.toml when present).
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dispatcher and feed it signal tokens from stdin.
    Run,

    /// Dispatch one signal and print its result.
    Trigger {
        /// Signal token: EMERGENCY, SNAPSHOT, MESSAGE, or STRESS_RELIEF.
        token: String,

        /// Print the full result record as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the registered workflows and their pipelines.
    Workflows,

    /// Dispatch every registered workflow once and report the outcomes.
    Drill,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Credentials may live in a local .env during development.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let settings_path = cli.settings.as_deref();

    match cli.command {
        Commands::Run => cmd_run(settings_path).await,
        Commands::Trigger { token, json } => cmd_trigger(settings_path, &token, json).await,
        Commands::Workflows => cmd_workflows(),
        Commands::Drill => cmd_drill(settings_path).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: run
// ---------------------------------------------------------------------------

async fn cmd_run(settings_path: Option<&Path>) -> Result<()> {
    init_tracing("info");

    info!("starting neurodeck");
    let (dispatcher, worker) = build_dispatcher(settings_path)?;
    let tokens = builtin_tokens()?;

    println!();
    println!("  Neurodeck v{}", env!("CARGO_PKG_VERSION"));
    println!("  Signals: {}", tokens.join(", "));
    println!("  Type a signal token, 'help', or 'quit' to exit.");
    println!();

    let stdin = io::stdin();
    let reader = stdin.lock();

    for line in reader.lines() {
        let line = line.context("failed to read input")?;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("exit") {
            info!("user requested exit");
            break;
        }

        if trimmed.eq_ignore_ascii_case("help") {
            println!();
            println!("  Signals: {}", tokens.join(", "));
            println!("  quit / exit  - stop the dispatcher");
            println!();
            continue;
        }

        // Tokens are matched case-sensitively; be forgiving at the prompt.
        match dispatcher.dispatch(Signal::new(trimmed.to_uppercase())).await {
            Ok(result) => print_result(&result),
            Err(e) => {
                error!(error = %e, "dispatch failed");
                println!("  Error: {e}");
            }
        }
    }

    dispatcher.shutdown();
    worker.await.context("dispatcher worker panicked")?;
    info!("shut down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: trigger
// ---------------------------------------------------------------------------

async fn cmd_trigger(settings_path: Option<&Path>, token: &str, as_json: bool) -> Result<()> {
    init_tracing("info");

    let (dispatcher, worker) = build_dispatcher(settings_path)?;
    let result = dispatcher
        .dispatch(Signal::new(token.to_uppercase()))
        .await
        .context("dispatch failed")?;

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("result does not serialize")?
        );
    } else {
        print_result(&result);
    }

    dispatcher.shutdown();
    worker.await.context("dispatcher worker panicked")?;

    if result.status == RunStatus::Aborted {
        anyhow::bail!("workflow `{}` aborted", result.workflow);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: workflows
// ---------------------------------------------------------------------------

fn cmd_workflows() -> Result<()> {
    init_tracing("warn");

    let registry = WorkflowRegistry::builtin().context("failed to load workflow definitions")?;

    println!();
    println!("  Registered workflows:");
    println!();
    for definition in registry.definitions() {
        let class = definition.class.to_string();
        println!(
            "  {:<14} {:<10} {}",
            definition.token, class, definition.description
        );
        for step in &definition.steps {
            println!("      {:<18} -> {}", step.name, step.capability);
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: drill
// ---------------------------------------------------------------------------

/// Run every registered workflow once, in token order, against the real
/// adapters. Steps that need missing credentials degrade or abort exactly as
/// they would in the field, which is the point of the drill.
async fn cmd_drill(settings_path: Option<&Path>) -> Result<()> {
    init_tracing("info");

    let (dispatcher, worker) = build_dispatcher(settings_path)?;
    let tokens = builtin_tokens()?;

    println!();
    println!("  Drilling {} workflows", tokens.len());

    let mut aborted = Vec::new();
    for token in &tokens {
        println!();
        println!("  == {token}");
        let result = dispatcher
            .dispatch(Signal::new(token.as_str()))
            .await
            .context("dispatch failed")?;
        print_result(&result);
        if result.status == RunStatus::Aborted {
            aborted.push(token.clone());
        }
    }

    dispatcher.shutdown();
    worker.await.context("dispatcher worker panicked")?;

    println!();
    if aborted.is_empty() {
        println!("  Drill complete: all workflows ran.");
        Ok(())
    } else {
        anyhow::bail!("drill failed for: {}", aborted.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load settings, build the standard adapter set, and start the dispatcher
/// worker.
fn build_dispatcher(settings_path: Option<&Path>) -> Result<(Dispatcher, JoinHandle<()>)> {
    let settings = Settings::load(settings_path).context("failed to load settings")?;
    let registry = WorkflowRegistry::builtin().context("failed to load workflow definitions")?;
    let capabilities = Arc::new(standard_set(&settings));

    let dispatcher = Dispatcher::new(registry, capabilities, settings.dispatcher.to_config())
        .context("failed to construct the dispatcher")?;
    let worker = dispatcher.start();
    Ok((dispatcher, worker))
}

/// Sorted tokens of the built-in workflows.
fn builtin_tokens() -> Result<Vec<String>> {
    let registry = WorkflowRegistry::builtin().context("failed to load workflow definitions")?;
    Ok(registry
        .definitions()
        .iter()
        .map(|definition| definition.token.clone())
        .collect())
}

/// Print one result as a status line, the per-step trail, and the summary.
fn print_result(result: &WorkflowResult) {
    let status = match result.status {
        RunStatus::Completed => "completed".to_string(),
        RunStatus::CompletedWithDegradation => "completed with degradation".to_string(),
        RunStatus::Aborted => match result.reason {
            Some(reason) => format!("aborted ({reason})"),
            None => "aborted".to_string(),
        },
    };
    let elapsed = result
        .finished_at
        .signed_duration_since(result.started_at)
        .num_milliseconds();

    println!();
    println!("  {}: {status} in {elapsed}ms", result.workflow);
    for outcome in &result.outcomes {
        let state = match &outcome.status {
            StepStatus::Ok { .. } => "ok".to_string(),
            StepStatus::Failed { reason, detail } => format!("failed ({reason}): {detail}"),
            StepStatus::Skipped { .. } => "skipped (substitute applied)".to_string(),
        };
        println!(
            "    {:<18} {:>5}ms  {state}",
            outcome.step, outcome.elapsed_ms
        );
    }
    println!("  summary: {}", result.summary);
    println!();
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
