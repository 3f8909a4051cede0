//! Polity daemon: runs the session coordinator behind the RPC server.

mod config;
mod sinks;

use anyhow::Context;
use clap::Parser;
use config::DaemonConfig;
use polity_coordinator::{Collaborators, SessionCoordinator};
use polity_rpc::RpcServer;
use polity_store::MemoryStore;
use polity_utils::{format_duration, init_logging, LogFormat};
use polity_voting::SystemClock;
use sinks::{LogAmendmentWorkflow, LogNotifier, LogTimeline};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "polity-daemon", about = "Polity structured voting daemon")]
struct Cli {
    /// RPC server port.
    #[arg(long, env = "POLITY_RPC_PORT")]
    rpc_port: Option<u16>,

    /// Enable the Prometheus metrics endpoint.
    #[arg(long, env = "POLITY_ENABLE_METRICS")]
    metrics: bool,

    /// Log format: "human" or "json".
    #[arg(long, env = "POLITY_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Log filter: "trace", "debug", "info", "warn", "error" or a directive list.
    #[arg(long, env = "POLITY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Voting time limit for sessions that do not set their own.
    #[arg(long, env = "POLITY_DEFAULT_TIME_LIMIT_SECS")]
    default_time_limit_secs: Option<u64>,

    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "POLITY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the coordinator and RPC server until interrupted.
    Serve,
    /// Print the effective configuration as TOML.
    DefaultConfig,
}

impl Cli {
    fn resolve(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_toml_file(path)?,
            None => DaemonConfig::default(),
        };
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        config.enable_metrics |= self.metrics;
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(limit) = self.default_time_limit_secs {
            config.coordinator.default_time_limit_secs = limit;
        }
        config.coordinator.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve()?;

    match cli.command {
        Command::DefaultConfig => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Serve => {
            init_logging(config.log_format, &config.log_level);
            serve(config).await?;
        }
    }
    Ok(())
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    tracing::info!(
        rpc_port = config.rpc_port,
        metrics = config.enable_metrics,
        default_time_limit = %format_duration(config.coordinator.default_time_limit_secs),
        "starting Polity daemon"
    );

    let coordinator = SessionCoordinator::start(
        config.coordinator.clone(),
        Arc::new(MemoryStore::new()),
        Collaborators {
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            timeline: Arc::new(LogTimeline),
            workflow: Arc::new(LogAmendmentWorkflow),
        },
    )
    .context("failed to start session coordinator")?;

    let server = RpcServer::new(config.rpc_port, config.enable_metrics, coordinator.clone());
    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown signal received, stopping");
        })
        .await?;

    coordinator.shutdown().await;
    tracing::info!("Polity daemon exited cleanly");
    Ok(())
}
