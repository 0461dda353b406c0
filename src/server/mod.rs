// src/server/mod.rs

use crate::config::Config;
use crate::core::backend::BackendDriver;
use anyhow::{Result, anyhow};
use std::future::Future;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;

pub use context::ServerContext;
pub use initialization::setup;

pub(crate) use initialization::load_certs;

/// Runs the gateway until SIGINT or SIGTERM.
pub async fn run(config: Config, driver: Arc<dyn BackendDriver>) -> Result<()> {
    let shutdown = shutdown_signal()?;
    let ctx = setup(config, driver).await?;
    serve(ctx, shutdown).await;
    Ok(())
}

/// Starts the background tasks and runs the accept loop until `shutdown` resolves.
pub async fn serve<F>(mut ctx: ServerContext, shutdown: F)
where
    F: Future<Output = ()>,
{
    spawn_background_tasks(&mut ctx);
    connection_loop::run(ctx, shutdown).await;
}

fn spawn_background_tasks(ctx: &mut ServerContext) {
    if ctx.state.config.metrics.enabled {
        let metrics_state = ctx.state.clone();
        let shutdown_rx = ctx.shutdown_tx.subscribe();
        ctx.background_tasks
            .spawn(metrics_server::run_metrics_server(metrics_state, shutdown_rx));
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }
}

/// Registers the signal handlers up front so a failure surfaces before the
/// listener is bound.
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    let mut sigint =
        signal(SignalKind::interrupt()).map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;
    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
            _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
        }
    })
}
