//! rio-agent binary entry point: CLI args, logging, and the task
//! supervisor that wires [`rio_agent::manager::Agent`] into a running
//! process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use rio_agent::manager::Agent;
use rio_agent::plugin::FeaturePlugin;

#[derive(Parser, Debug)]
#[command(name = "rio-agent")]
#[command(about = "Remote IoT fleet agent")]
#[command(version)]
struct CliArgs {
    /// Path to the Settings JSON file.
    #[arg(long, env = "RIO_SETTINGS_PATH", default_value = "./data/settings.json")]
    settings: PathBuf,

    /// Directory holding crontab.json, Ruleset.json, the retry backlog,
    /// and the process lock file.
    #[arg(long, env = "RIO_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Overrides the admin endpoint port from Settings. Goes through the
    /// same mutate-and-persist path as a runtime `config` request, so it
    /// sticks for subsequent runs too.
    #[arg(long)]
    admin_port: Option<u16>,

    /// Wipes the retry backlog directory before startup for a clean-room
    /// run. Settings, crontab.json and Ruleset.json are left untouched.
    #[arg(long)]
    reset: bool,

    /// Raises tracing verbosity; repeatable (-v, -vv, -vvv). Ignored if
    /// `RUST_LOG` is already set in the environment.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Scheduler,
    Heartbeat,
    AlertIngest,
    Admin,
    SelfHealer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Scheduler => write!(f, "Scheduler"),
            TaskName::Heartbeat => write!(f, "Heartbeat"),
            TaskName::AlertIngest => write!(f, "AlertIngest"),
            TaskName::Admin => write!(f, "Admin"),
            TaskName::SelfHealer => write!(f, "SelfHealer"),
        }
    }
}

#[cfg(unix)]
async fn wait_for_terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_terminate() {
    std::future::pending::<()>().await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let default_filter = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    if args.reset {
        let backlog_dir = args.data_dir.join("backlog");
        if backlog_dir.exists() {
            std::fs::remove_dir_all(&backlog_dir).context("failed to clear retry backlog for --reset")?;
        }
        info!(dir = %backlog_dir.display(), "reset: cleared retry backlog");
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = wait_for_terminate() => info!("received SIGTERM, shutting down"),
        }
        signal_cancel.cancel();
    });

    // Concrete feature plugins (mail/SMS senders, GPS parser, simulator, ...)
    // are out of scope for this core; an embedder registers its own here.
    let plugins: Vec<Arc<dyn FeaturePlugin>> = Vec::new();

    let agent = Agent::bootstrap(args.settings, args.data_dir, plugins, cancel.clone()).await?;
    if let Some(port) = args.admin_port {
        agent.settings.mutate(|s| s.admin_port = port);
    }

    let mut tasks: JoinSet<(TaskName, Result<()>)> = JoinSet::new();
    tasks.spawn({
        let agent = agent.clone();
        let cancel = cancel.clone();
        async move {
            agent.run_scheduler(cancel).await;
            (TaskName::Scheduler, Ok(()))
        }
    });
    tasks.spawn({
        let agent = agent.clone();
        let cancel = cancel.clone();
        async move {
            agent.run_heartbeat(cancel).await;
            (TaskName::Heartbeat, Ok(()))
        }
    });
    tasks.spawn({
        let agent = agent.clone();
        let cancel = cancel.clone();
        async move {
            agent.run_alert_ingest(cancel).await;
            (TaskName::AlertIngest, Ok(()))
        }
    });
    tasks.spawn({
        let agent = agent.clone();
        let cancel = cancel.clone();
        async move { (TaskName::Admin, agent.run_admin(cancel).await) }
    });
    tasks.spawn({
        let agent = agent.clone();
        let cancel = cancel.clone();
        async move {
            agent.run_self_healer(cancel).await;
            (TaskName::SelfHealer, Ok(()))
        }
    });

    info!("rio-agent started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("supervisor: shutdown signal received, waiting for tasks to drain");
                break;
            }
            result = tasks.join_next() => {
                match result {
                    Some(Ok((name, Ok(())))) => info!(task = %name, "task exited normally"),
                    Some(Ok((name, Err(e)))) => {
                        error!(task = %name, error = %e, "task failed, cancelling the rest");
                        cancel.cancel();
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "task panicked, cancelling the rest");
                        cancel.cancel();
                    }
                    None => {
                        info!("supervisor: all tasks exited");
                        return Ok(());
                    }
                }
            }
        }
    }

    while tasks.join_next().await.is_some() {}
    info!("rio-agent shutdown complete");
    Ok(())
}
