//! vibe - durable code-agent runs from the command line
//!
//! ## Commands
//!
//! - `run`: validate a request, execute it to completion, print its result
//! - `worker`: execute `code-agent/run` events read from stdin, one per line
//! - `status`: show a run and its step ledger
//! - `messages`: show a project's conversation (requests and outcomes)
//! - `tree`: show the file tree of a run's artifact

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};
use vibe_core::{
    files_to_tree, CodeAgentEngine, DockerSandboxProvider, EngineConfig, EngineStores,
    ModelConfig, OpenAiChatModel, RunRequest, RunWorker, TriggerEvent, WorkerEvent,
};
use vibe_state::{
    Fragment, MessageRole, OutcomeKind, OutcomeRecord, RunId, RunRecord, StepRecord,
    SurrealLedger,
};

#[derive(Parser)]
#[command(name = "vibe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Durable code-agent orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// SurrealDB endpoint (default: local surrealkv store under .vibe/db)
    #[arg(long, global = true, env = "SURREALDB_URL")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one request to completion
    Run {
        /// Project the run belongs to
        #[arg(short, long)]
        project: String,

        /// Agent turns before giving up
        #[arg(long, env = "VIBE_MAX_ITERATIONS")]
        max_iterations: Option<u32>,

        /// Generate a fragment title and a closing message
        #[arg(long)]
        titles: bool,

        /// Request text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Execute events read from stdin as JSON lines
    Worker {
        /// Runs executed at the same time
        #[arg(long, env = "VIBE_MAX_CONCURRENT_RUNS")]
        concurrency: Option<usize>,
    },

    /// Show a run and its steps
    Status {
        run_id: String,
    },

    /// Show the messages of a project, oldest first
    Messages {
        project_id: String,
    },

    /// Show the file tree of a run's artifact
    Tree {
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    vibe_core::telemetry::init_tracing(cli.json, level);

    let ledger = match cli.db.as_deref() {
        Some(url) => SurrealLedger::connect(url).await,
        None => SurrealLedger::from_env().await,
    }
    .context("Failed to open the vibe database")?;
    let stores = EngineStores::surreal(ledger);

    match cli.command {
        Commands::Run {
            project,
            max_iterations,
            titles,
            text,
        } => {
            let mut config = EngineConfig::from_env();
            if let Some(n) = max_iterations {
                config = config.with_max_iterations(n);
            }
            if titles {
                config = config.with_generate_titles(true);
            }
            cmd_run(build_engine(config, stores)?, &project, &text.join(" ")).await
        }
        Commands::Worker { concurrency } => {
            let mut config = EngineConfig::from_env();
            if let Some(n) = concurrency {
                config = config.with_max_concurrent_runs(n);
            }
            cmd_worker(build_engine(config, stores)?).await
        }
        Commands::Status { run_id } => cmd_status(&stores, &RunId::from(run_id.as_str())).await,
        Commands::Messages { project_id } => cmd_messages(&stores, &project_id).await,
        Commands::Tree { run_id } => cmd_tree(&stores, &RunId::from(run_id.as_str())).await,
    }
}

fn build_engine(config: EngineConfig, stores: EngineStores) -> Result<CodeAgentEngine> {
    let model = OpenAiChatModel::new(ModelConfig::from_env())
        .context("Failed to build the model client")?;
    Ok(CodeAgentEngine::new(
        config,
        Arc::new(DockerSandboxProvider::from_env().context("Failed to connect to Docker")?),
        Arc::new(model),
        stores,
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_run(engine: CodeAgentEngine, project: &str, text: &str) -> Result<()> {
    let report = engine.run(RunRequest::new(text, project)).await?;
    info!(run_id = %report.run.run_id, status = %report.run.status, "run finished");

    match report.output {
        Some(output) => print_json(&output),
        None => {
            print_json(&report.run)?;
            bail!(
                "run {} failed: {}",
                report.run.run_id,
                report.run.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

/// One line of worker output.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WorkerLine {
    Finished {
        run_id: String,
        status: String,
        error: Option<String>,
    },
    Rejected {
        reason: String,
    },
    Skipped {
        name: String,
    },
    Errored {
        run_id: String,
        error: String,
    },
}

impl From<WorkerEvent> for WorkerLine {
    fn from(event: WorkerEvent) -> Self {
        match event {
            WorkerEvent::Finished(report) => WorkerLine::Finished {
                run_id: report.run.run_id.0,
                status: report.run.status.to_string(),
                error: report.run.error,
            },
            WorkerEvent::Rejected { reason } => WorkerLine::Rejected { reason },
            WorkerEvent::Skipped { name } => WorkerLine::Skipped { name },
            WorkerEvent::Errored { run_id, error } => WorkerLine::Errored {
                run_id: run_id.0,
                error: error.to_string(),
            },
        }
    }
}

async fn cmd_worker(engine: CodeAgentEngine) -> Result<()> {
    let capacity = engine.config().max_concurrent_runs.max(1) * 4;
    let (tx, rx) = mpsc::channel(capacity);
    let (results_tx, mut results_rx) = mpsc::channel::<WorkerEvent>(capacity);
    let worker = tokio::spawn(RunWorker::new(engine).run(rx, results_tx));
    let printer = tokio::spawn(async move {
        while let Some(event) = results_rx.recv().await {
            println!("{}", serde_json::to_string(&WorkerLine::from(event))?);
        }
        Ok::<_, serde_json::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TriggerEvent>(&line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "skipping malformed event line"),
        }
    }
    drop(tx);

    let processed = worker.await.context("worker task failed")?;
    printer.await.context("printer task failed")??;
    info!(processed, "worker finished");
    Ok(())
}

#[derive(Debug, Serialize)]
struct StepView {
    step_id: String,
    status: String,
    failures: u32,
    last_error: Option<String>,
    digest: Option<String>,
}

impl From<&StepRecord> for StepView {
    fn from(step: &StepRecord) -> Self {
        Self {
            step_id: step.step_id.clone(),
            status: step.status.as_str().to_string(),
            failures: step.failures,
            last_error: step.last_error.clone(),
            digest: step.output_digest.as_ref().map(|d| d.short().to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusView {
    run: RunRecord,
    steps: Vec<StepView>,
    outcome: Option<OutcomeRecord>,
}

async fn cmd_status(stores: &EngineStores, run_id: &RunId) -> Result<()> {
    let run = stores
        .runs
        .get_run(run_id)
        .await
        .with_context(|| format!("Run {run_id} not found"))?;
    let steps = stores.steps.list_steps(run_id).await?;
    let outcome = stores.outcomes.outcome_for_run(run_id).await?;
    print_json(&StatusView {
        run,
        steps: steps.iter().map(StepView::from).collect(),
        outcome,
    })
}

/// A project message as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageView {
    role: MessageRole,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<OutcomeKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fragment: Option<Fragment>,
    created_at: DateTime<Utc>,
}

/// Interleave run inputs (USER) with run outcomes (ASSISTANT) by time.
fn conversation(runs: &[RunRecord], outcomes: &[OutcomeRecord]) -> Vec<MessageView> {
    let mut messages: Vec<MessageView> = runs
        .iter()
        .map(|run| MessageView {
            role: MessageRole::User,
            content: run.input.clone(),
            kind: Some(OutcomeKind::Result),
            fragment: None,
            created_at: run.created_at,
        })
        .chain(outcomes.iter().map(|o| MessageView {
            role: o.role,
            content: o.content.clone(),
            kind: Some(o.kind),
            fragment: o.fragment.clone(),
            created_at: o.created_at,
        }))
        .collect();
    messages.sort_by_key(|m| m.created_at);
    messages
}

async fn cmd_messages(stores: &EngineStores, project_id: &str) -> Result<()> {
    let runs = stores.runs.list_runs(Some(project_id)).await?;
    let outcomes = stores.outcomes.list_for_project(project_id).await?;
    print_json(&conversation(&runs, &outcomes))
}

async fn cmd_tree(stores: &EngineStores, run_id: &RunId) -> Result<()> {
    let outcome = stores.outcomes.outcome_for_run(run_id).await?;
    let Some(fragment) = outcome.and_then(|o| o.fragment) else {
        bail!("Run {run_id} has no artifact");
    };
    print_json(&files_to_tree(&fragment.files))
}
