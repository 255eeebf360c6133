use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use uiscribe::brain::{Brain, OpenAiModel};
use uiscribe::recorder::slugify;
use uiscribe::session::ChromeSession;
use uiscribe::types::DecisionErrorPolicy;
use uiscribe::{AgentConfig, Runner, StoppedReason, Task};

/// Selector-poll timeout used when resolving click/fill targets.
const FIND_TIMEOUT_MS: u64 = 3000;

#[derive(Parser)]
#[command(name = "uiscribe", version)]
#[command(about = "Drive a browser through a task with an LLM and capture each UI state transition")]
struct Cli {
    /// High-level task description, e.g. "Create a repo in GitHub"
    #[arg(long)]
    task: String,

    /// Start URL for the web app, e.g. https://github.com/new
    #[arg(long)]
    url: String,

    /// Short ID for the dataset run directory (derived from the task if omitted)
    #[arg(long)]
    task_id: Option<String>,

    /// Run Chrome without a visible window
    #[arg(long)]
    headless: bool,

    /// Override the configured step budget
    #[arg(long)]
    max_steps: Option<usize>,

    /// Dataset root directory
    #[arg(long)]
    dataset_dir: Option<PathBuf>,

    /// Stop the run when a model decision cannot be parsed, instead of
    /// recording it and continuing
    #[arg(long)]
    strict_decisions: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "uiscribe=debug"
    } else {
        "uiscribe=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(cli).await {
        Ok(StoppedReason::FatalError) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<StoppedReason> {
    let mut config = AgentConfig::from_env();
    if let Some(max_steps) = cli.max_steps {
        config.max_steps = max_steps;
    }
    if let Some(dataset_dir) = cli.dataset_dir {
        config.dataset_root = dataset_dir;
    }
    if cli.strict_decisions {
        config.decision_error_policy = DecisionErrorPolicy::Strict;
    }
    config.headless = cli.headless;

    let task = Task {
        task_id: cli
            .task_id
            .unwrap_or_else(|| slugify(&cli.task)),
        description: cli.task,
        start_url: cli.url,
    };
    info!(task_id = %task.task_id, start_url = %task.start_url, "starting run");

    let model = OpenAiModel::new(&config)?;
    let brain = Brain::new(Arc::new(model), config.history_window);

    // Chrome can take a while to come up; keep it off the async threads.
    let headless = config.headless;
    let session = tokio::task::spawn_blocking(move || ChromeSession::launch(headless, FIND_TIMEOUT_MS))
        .await
        .map_err(|e| anyhow::anyhow!("browser launch panicked: {e}"))??;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(true);
        }
    });

    let runner = Runner::new(config, Arc::new(session), Arc::new(brain));
    let run = runner.run(task, cancel_rx).await?;

    info!(stopped_reason = ?run.stopped_reason, steps = run.steps.len(), "done");
    Ok(run.stopped_reason)
}
