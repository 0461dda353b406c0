// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client stream.

use super::guard::SessionGuard;
use crate::core::GatewayError;
use crate::core::protocol::ServerCodec;
use crate::core::state::GatewayState;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Why the main loop stopped.
enum LoopExit {
    /// The client finished sending; answer what is queued, then close.
    Drain,
    /// The server is going down.
    Shutdown,
    /// The transport failed or the client sent something unparsable.
    Failed(GatewayError),
}

/// Manages one client stream from open to teardown.
pub struct ConnectionHandler<S> {
    framed: Framed<S, ServerCodec>,
    addr: SocketAddr,
    state: Arc<GatewayState>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        socket: S,
        addr: SocketAddr,
        state: Arc<GatewayState>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let codec = ServerCodec::new(state.config.max_frame_bytes);
        Self {
            framed: Framed::new(socket, codec),
            addr,
            state,
            shutdown_rx,
        }
    }

    /// The main event loop: reads requests into the session's queue and writes
    /// responses back as the worker produces them.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let session = self.state.sessions.open_stream(Some(self.addr));
        let guard = SessionGuard::new(self.state.sessions.clone(), session.clone());

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let queue = self.state.dispatcher.spawn_worker(
            session.clone(),
            self.state.config.command_queue_depth,
            outbound_tx,
        );

        let exit = loop {
            tokio::select! {
                // Prioritize shutdown, then flushing responses, then reading.
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!("Connection handler for {} received shutdown signal.", self.addr);
                    break LoopExit::Shutdown;
                }
                Some(response) = outbound_rx.recv() => {
                    debug!("Session {}: sending response #{}", session.id(), response.sequence);
                    if let Err(e) = self.framed.send(response.item).await {
                        break LoopExit::Failed(e);
                    }
                }
                frame = self.framed.next() => match frame {
                    Some(Ok(request)) => {
                        debug!("Session {}: received {:?}", session.id(), request);
                        if let Err(e) = queue.submit(request).await {
                            break LoopExit::Failed(e);
                        }
                    }
                    Some(Err(e)) => break LoopExit::Failed(e),
                    None => {
                        debug!("Connection from {} closed by peer.", self.addr);
                        break LoopExit::Drain;
                    }
                },
            }
        };

        let result = match exit {
            LoopExit::Drain => {
                queue.finish().await;
                while let Some(response) = outbound_rx.recv().await {
                    if let Err(e) = self.framed.send(response.item).await {
                        debug!("Could not flush response to {}: {}", self.addr, e);
                        break;
                    }
                }
                Ok(())
            }
            LoopExit::Shutdown => {
                queue.abort();
                Ok(())
            }
            LoopExit::Failed(e) => {
                queue.abort();
                if is_normal_disconnect(&e) {
                    debug!("Connection from {} closed by peer: {}", self.addr, e);
                    Ok(())
                } else {
                    warn!("Connection error for {}: {}", self.addr, e);
                    Err(e)
                }
            }
        };

        guard.close().await;
        result
    }
}

/// Helper function to check for non-critical disconnection errors.
fn is_normal_disconnect(e: &GatewayError) -> bool {
    matches!(e, GatewayError::Io(arc_err) if matches!(
        arc_err.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionAborted
    ))
}
