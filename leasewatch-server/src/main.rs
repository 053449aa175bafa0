//! # Leasewatch Server
//!
//! Portfolio scan service for tenant-credit monitoring.
//!
//! ## Overview
//!
//! - **Scans**: start a scan over a tenant selection and a set of data
//!   sources, cancel it, and follow its progress live over SSE
//! - **History**: paginated terminal runs with per-tenant results and
//!   aggregate insights
//! - **Settings**: default sources, frequency and lookback used by
//!   scheduled and body-less scans
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - `leasewatch-core` for orchestration
//! - in-memory or PostgreSQL storage for scan history
//! - HTTP feed connectors (or scripted demo sources) for data collection

use anyhow::Context;
use clap::Parser;
use leasewatch_server::{
    AppState, create_app,
    infra::{
        config::{Config, ConfigSource},
        scheduler::ScanScheduler,
        startup::build_state,
    },
};
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "leasewatch-server")]
#[command(about = "Portfolio scan orchestration service for tenant-credit monitoring")]
struct Cli {
    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Path to a TOML or JSON configuration file
    #[arg(short, long, env = "LEASEWATCH_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Scan-wide deadline, e.g. `10m` (overrides config)
    #[arg(long, env = "LEASEWATCH_SCAN_TIMEOUT", value_parser = humantime::parse_duration)]
    scan_timeout: Option<Duration>,

    /// Per-source call deadline, e.g. `45s` (overrides config)
    #[arg(long, env = "LEASEWATCH_SOURCE_TIMEOUT", value_parser = humantime::parse_duration)]
    source_timeout: Option<Duration>,

    /// Start scans automatically at the configured frequency
    #[arg(long, env = "LEASEWATCH_SCHEDULER", default_value_t = false)]
    schedule: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file_loaded = dotenvy::dotenv().is_ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,leasewatch_core=info,leasewatch_server=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if env_file_loaded {
        info!("loaded .env file");
    }

    let (mut config, source) = Config::load(cli.config.as_deref())?;
    match &source {
        ConfigSource::File(path) => {
            info!(path = %path.display(), "configuration loaded from file")
        }
        ConfigSource::InlineJson => {
            info!("configuration loaded from inline environment json")
        }
        ConfigSource::Defaults => info!("no configuration file found; using defaults"),
    }
    apply_cli_overrides(&mut config, &cli);

    let state = build_state(config).await?;
    run_server(state).await
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(host) = cli.host.clone() {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(timeout) = cli.scan_timeout {
        config.orchestrator.scan_timeout_ms = timeout.as_millis() as u64;
    }
    if let Some(timeout) = cli.source_timeout {
        config.orchestrator.per_source_timeout_ms = timeout.as_millis() as u64;
    }
    if cli.schedule {
        config.scheduler.enabled = true;
    }
}

async fn run_server(state: AppState) -> anyhow::Result<()> {
    let config = state.config();
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let scheduler = if config.scheduler.enabled {
        info!(frequency = ?state.settings().get().await.frequency, "scan scheduler enabled");
        Some(ScanScheduler::new(state.clone()).spawn())
    } else {
        None
    };

    if config.dev_mode {
        warn!("DEV_MODE enabled: CORS is permissive");
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting Leasewatch server on {addr}");

    let router = create_app(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    if let Some(handle) = scheduler
        && let Err(err) = handle.await
    {
        error!(error = %err, "scan scheduler task failed");
    }
    info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, after active scans have been cancelled and persisted
/// so open event streams can close.
async fn shutdown_signal(state: AppState) {
    let token: CancellationToken = state.shutdown.clone();
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(err) = res {
                error!(error = %err, "failed to listen for shutdown signal");
            }
        }
        _ = token.cancelled() => {}
    }
    info!("shutdown requested; cancelling active scans");
    token.cancel();
    state.coordinator().shutdown().await;
}
