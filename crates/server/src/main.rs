// crates/server/src/main.rs
//! Jobtrack server binary.
//!
//! Builds one `JobRegistry` for the process, serves the status API, and runs
//! the periodic sweeper until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use jobtrack_jobs::{spawn_sweeper, Executor, JobRegistry};
use jobtrack_observability::{init_metrics, init_tracing, LogConfig};
use jobtrack_server::{create_app, AppState, ServerConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();
    config.validate()?;

    init_tracing(&LogConfig {
        format: config.log_format,
        ..LogConfig::default()
    })?;
    init_metrics();

    let registry = Arc::new(JobRegistry::new());
    let executor = Executor::new(Arc::clone(&registry));

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(Arc::clone(&registry), config.sweeper(), shutdown.clone());

    let app = create_app(AppState::new(executor, config.max_age()));

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        cleanup_interval_secs = config.cleanup_interval_secs,
        max_age_secs = config.max_age_secs,
        "jobtrack listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error")?;

    shutdown.cancel();
    sweeper.await.context("sweeper task panicked")?;
    tracing::info!(remaining_jobs = registry.len(), "jobtrack stopped");
    Ok(())
}

/// Resolve on Ctrl-C and stop background work.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C, serving until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
    shutdown.cancel();
}
