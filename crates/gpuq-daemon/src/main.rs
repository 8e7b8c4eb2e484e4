//! gpuqd daemon
//!
//! Main daemon process: owns the scheduler, the task store, and the REST
//! server. Live tmux sessions are left running on shutdown and adopted again
//! on the next start.

use anyhow::Context;
use clap::Parser;
use gpuq_api::create_router;
use gpuq_core::DaemonConfig;
use gpuq_probe::NvidiaSmiProbe;
use gpuq_runner::TmuxRunner;
use gpuq_scheduler::Scheduler;
use gpuq_store::TaskStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// gpuqd - single-host GPU job scheduler
#[derive(Parser, Debug)]
#[command(name = "gpuqd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Runtime directory holding the task store and work trees
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Scheduling tick interval in seconds
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(address) = args.address {
        config.api.address = address;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(runtime_dir) = args.runtime_dir {
        config.scheduler.runtime_dir = runtime_dir;
    }
    if let Some(poll_interval) = args.poll_interval {
        config.scheduler.poll_interval_secs = poll_interval;
    }
    if let Some(log_level) = args.log_level {
        config.logging.level = log_level;
    }
    config.apply_env();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.logging.level))
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set subscriber")?;

    info!("Starting gpuqd v{}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.scheduler.runtime_dir)
        .await
        .context("failed to create runtime directory")?;
    // Work-tree scripts embed paths; make them independent of our cwd
    config.scheduler.runtime_dir = tokio::fs::canonicalize(&config.scheduler.runtime_dir)
        .await
        .context("failed to resolve runtime directory")?;

    let store = TaskStore::open(&config.scheduler.db_path())
        .await
        .context("failed to open task store")?;
    let probe = Arc::new(NvidiaSmiProbe::new(config.scheduler.probe_timeout()));
    let runner = Arc::new(TmuxRunner::new());
    let scheduler = Arc::new(Scheduler::new(
        store,
        probe,
        runner,
        config.scheduler.clone(),
    ));
    Arc::clone(&scheduler)
        .start()
        .await
        .context("failed to start scheduler")?;

    let router = create_router(Arc::clone(&scheduler), &config.api);
    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("invalid bind address")?;

    info!("API server listening on {}", addr);
    info!(
        "Runtime directory: {}",
        config.scheduler.runtime_dir.display()
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind")?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Stops the tick loop only; running sessions are adopted on next start
    scheduler.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}
