//! Judge CLI entry point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use judge::config::{load_judge_config, JudgeConfig, DEFAULT_CONFIG_PATH};
use uranus::fatal::{wait_for_exit, ExitCause, FatalSignal};
use uranus::store::Store;
use uranus::worker::{JudgeDomain, Worker};

/// Judge — trusts commands the kernel has seen often enough.
#[derive(Parser)]
#[command(name = "judge", version, about)]
struct Cli {
    /// Path to the judge config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the judge worker until signalled.
    Start,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_judge_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Start => handle_start(config).await,
    }
}

/// Run the judge daemon until SIGINT, SIGTERM or a fatal condition.
async fn handle_start(config: JudgeConfig) -> anyhow::Result<ExitCode> {
    let _logging_guard = uranus::logging::init_production(&config.logging.dir, "judge.log")?;

    let store = Store::open(&config.storage.db, config.storage.max_connections)
        .await
        .context("failed to open judge store")?;
    let fatal = FatalSignal::new();
    let mut worker = Worker::new(
        JudgeDomain::new(store.clone(), config.judge.threshold),
        store.clone(),
        config.kernel.endpoint(),
        config.worker_settings(),
        fatal.clone(),
    );

    info!(
        threshold = config.judge.threshold,
        db = %config.storage.db.display(),
        "judge starting"
    );

    if let Err(e) = worker.start().await {
        error!(error = %e, "judge worker failed to start");
        store.close().await;
        return Ok(ExitCode::FAILURE);
    }

    let cause = wait_for_exit(&fatal).await;

    let report = worker.stop().await;
    for failure in &report.failures {
        warn!(step = %failure.step, error = %failure.error, "shutdown step failed");
    }
    store.close().await;

    match cause {
        Ok(ExitCause::Signal(signal)) => {
            info!(signal, "judge stopped");
            Ok(ExitCode::SUCCESS)
        }
        Ok(ExitCause::Fatal(reason)) => {
            error!(reason = %reason, "judge stopped after fatal condition");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            error!(error = %e, "failed to install signal handlers");
            Ok(ExitCode::FAILURE)
        }
    }
}
