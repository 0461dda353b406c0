// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::stream::AnyStream;
use crate::connection::ConnectionHandler;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepts clients until `shutdown` resolves or a background task fails, then
/// tears every session down and closes all backend connections.
pub async fn run<F>(mut ctx: ServerContext, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut client_tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("Shutdown requested.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let permit = match ctx.connection_permits.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Rejecting connection from {}: max_clients reached.", addr);
                        continue;
                    }
                };
                info!("Accepted new connection from: {}", addr);

                if let Err(e) = socket.set_nodelay(true) {
                    debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                }

                let state = ctx.state.clone();
                let shutdown_rx = ctx.shutdown_tx.subscribe();
                let acceptor = ctx.acceptor.clone();

                client_tasks.spawn(async move {
                    let _permit = permit;
                    let stream = match acceptor {
                        Some(acceptor) => match acceptor.accept(socket).await {
                            Ok(tls_stream) => AnyStream::Tls(Box::new(tls_stream)),
                            Err(e) => {
                                warn!("TLS handshake error for {addr}: {e}");
                                return;
                            }
                        },
                        None => AnyStream::Tcp(socket),
                    };
                    if stream.is_tls() {
                        info!("TLS handshake successful for {addr}");
                    }
                    let handler = ConnectionHandler::new(stream, addr, state, shutdown_rx);
                    if let Err(e) = handler.run().await {
                        warn!("Connection from {} terminated unexpectedly: {}", addr, e);
                    }
                });
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No task was listening for the shutdown signal.");
    }

    // Handlers tear their sessions down on the signal; stragglers are aborted
    // and their guards schedule the teardown.
    if tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for client handlers, aborting the rest.");
        client_tasks.shutdown().await;
    }
    info!("All client connections closed.");

    let closed = ctx.state.registry.close_all().await;
    info!("Closed {} backend connection(s).", closed);

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_DRAIN_TIMEOUT, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}
