//! Uranus CLI entry point.
//!
//! Provides `start` for running the enforcement daemon, plus one-shot
//! `echo`, `shutdown` and `exec` subcommands that talk to the kernel module
//! directly.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use uranus::admin::Admin;
use uranus::config::{load_config, AgentConfig, DEFAULT_CONFIG_PATH};
use uranus::fatal::{wait_for_exit, ExitCause, FatalSignal};
use uranus::store::Store;
use uranus::worker::{FileDomain, NetDomain, ProcessDomain, ShutdownReport, Worker};

/// Uranus — user-space agent for the hackernel protection module.
#[derive(Parser)]
#[command(name = "uranus", version, about)]
struct Cli {
    /// Path to the agent config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the process, file and net workers until signalled.
    Start,
    /// Round-trip a payload through the kernel module.
    Echo {
        /// Text to echo.
        #[arg(default_value = "ping")]
        text: String,
    },
    /// Ask the kernel-side daemon to exit.
    Shutdown,
    /// Send a raw JSON request and print the reply.
    Exec {
        /// Request envelope, e.g. `{"type":"user::proc::enable"}`.
        json: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Start => handle_start(config).await,
        Command::Echo { text } => {
            uranus::logging::init_cli();
            let admin = one_shot_admin(&config).await?;
            let reply = admin
                .echo(serde_json::Value::String(text))
                .await
                .context("echo failed")?;
            println!("{reply}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Shutdown => {
            uranus::logging::init_cli();
            let admin = one_shot_admin(&config).await?;
            admin.shutdown_kernel().await.context("shutdown failed")?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Exec { json } => {
            uranus::logging::init_cli();
            let admin = one_shot_admin(&config).await?;
            let reply = admin.exec_raw(&json).await.context("exec failed")?;
            println!("{reply}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn one_shot_admin(config: &AgentConfig) -> anyhow::Result<Admin> {
    let store = Store::open(&config.storage.db, config.storage.max_connections)
        .await
        .context("failed to open policy store")?;
    Ok(Admin::new(store, config.kernel.endpoint()))
}

/// Run the daemon until SIGINT, SIGTERM or a fatal condition.
async fn handle_start(config: AgentConfig) -> anyhow::Result<ExitCode> {
    let _logging_guard = uranus::logging::init_production(&config.logging.dir, "uranus.log")?;

    let store = Store::open(&config.storage.db, config.storage.max_connections)
        .await
        .context("failed to open policy store")?;
    let endpoint = config.kernel.endpoint();
    let settings = config.worker_settings();
    let fatal = FatalSignal::new();

    let mut process = Worker::new(
        ProcessDomain::new(store.clone()),
        store.clone(),
        endpoint.clone(),
        settings,
        fatal.clone(),
    );
    let mut file = Worker::new(
        FileDomain::new(store.clone()),
        store.clone(),
        endpoint.clone(),
        settings,
        fatal.clone(),
    );
    let mut net = Worker::new(
        NetDomain::new(store.clone()),
        store.clone(),
        endpoint,
        settings,
        fatal.clone(),
    );

    info!(
        socket = %config.kernel.socket.display(),
        db = %config.storage.db.display(),
        "uranus starting"
    );

    let started = async {
        process.start().await.context("process worker failed to start")?;
        file.start().await.context("file worker failed to start")?;
        net.start().await.context("net worker failed to start")?;
        anyhow::Ok(())
    }
    .await;

    let cause = match started {
        Ok(()) => match wait_for_exit(&fatal).await {
            Ok(cause) => Some(cause),
            Err(e) => {
                error!(error = %e, "failed to install signal handlers");
                None
            }
        },
        Err(e) => {
            error!(error = %format!("{e:#}"), "startup aborted");
            None
        }
    };

    log_report(net.stop().await);
    log_report(file.stop().await);
    log_report(process.stop().await);
    store.close().await;

    match cause {
        Some(ExitCause::Signal(signal)) => {
            info!(signal, "uranus stopped");
            Ok(ExitCode::SUCCESS)
        }
        Some(ExitCause::Fatal(reason)) => {
            error!(reason = %reason, "uranus stopped after fatal condition");
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::FAILURE),
    }
}

fn log_report(report: ShutdownReport) {
    for failure in &report.failures {
        warn!(
            worker = report.worker,
            step = %failure.step,
            error = %failure.error,
            "shutdown step failed"
        );
    }
}
