// src/core/dispatcher.rs

//! Defines the `CommandDispatcher`, which turns each request on a session's
//! stream into exactly one response, in arrival order.
//!
//! Every stream gets a `SessionQueue`: a bounded channel drained by a single
//! worker task. The worker handles one request at a time, so command N+1 is
//! never started before command N has produced its response, while different
//! sessions run in parallel on their own workers.

use crate::core::errors::{CommandError, GatewayError};
use crate::core::metrics;
use crate::core::protocol::{CommandResponse, Request, Response};
use crate::core::registry::ConnectionRegistry;
use crate::core::session::{Session, SessionManager, SessionPhase};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// An item tagged with its position in a session's request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequenced<T> {
    pub sequence: u64,
    pub item: T,
}

pub struct CommandDispatcher {
    sessions: Arc<SessionManager>,
    registry: Arc<ConnectionRegistry>,
    command_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(sessions: Arc<SessionManager>, command_timeout: Duration) -> Self {
        let registry = sessions.registry().clone();
        Self {
            sessions,
            registry,
            command_timeout,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Runs `command` on the connection `session` is bound to.
    ///
    /// Fails with `NoConnection` without touching the registry when the session
    /// is unbound. The session stays locked until the backend answers, so a
    /// concurrent disconnect cannot pull the connection out from under it.
    pub async fn execute(&self, session: &Session, command: &str) -> Result<String, CommandError> {
        let phase = session.lock().await;
        let address = match &*phase {
            SessionPhase::Bound(address) => address.clone(),
            SessionPhase::Unbound => return Err(CommandError::NoConnection),
            SessionPhase::Terminated => return Err(CommandError::SessionTerminated),
        };

        let connection = self.registry.lookup(&address).await.ok_or_else(|| {
            CommandError::BackendFailure(format!("connection to {address} is no longer available"))
        })?;

        let started = Instant::now();
        let result = tokio::time::timeout(self.command_timeout, connection.run(command)).await;
        metrics::COMMAND_LATENCY_SECONDS.observe(started.elapsed().as_secs_f64());
        metrics::COMMANDS_EXECUTED_TOTAL.inc();
        drop(phase);

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(CommandError::BackendFailure(format!(
                "command timed out after {:?}",
                self.command_timeout
            ))),
        }
    }

    /// Like `execute`, but folds failures into the output text. A failed
    /// command is still a normal response and never ends the stream.
    pub async fn execute_response(&self, session: &Session, command: &str) -> CommandResponse {
        match self.execute(session, command).await {
            Ok(output) => CommandResponse { output },
            Err(e) => {
                metrics::COMMAND_ERRORS_TOTAL.inc();
                debug!("Session {}: command failed: {}", session.id(), e);
                CommandResponse {
                    output: e.to_string(),
                }
            }
        }
    }

    /// Produces the single response for one request.
    pub async fn handle(&self, session: &Session, request: Request) -> Response {
        match request {
            Request::Command(req) => {
                Response::Command(self.execute_response(session, &req.command).await)
            }
            Request::Connect(req) => {
                Response::Connect(self.sessions.handle_connect(session, &req.ip).await)
            }
            Request::Disconnect(req) => {
                Response::Disconnect(self.sessions.handle_disconnect(session, &req.ip).await)
            }
        }
    }

    /// Starts the sequential worker for `session`. Responses are pushed to
    /// `outbound` in the order their requests were submitted.
    pub fn spawn_worker(
        self: &Arc<Self>,
        session: Arc<Session>,
        queue_depth: usize,
        outbound: mpsc::UnboundedSender<Sequenced<Response>>,
    ) -> SessionQueue {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let worker = tokio::spawn(run_worker(
            Arc::clone(self),
            Arc::clone(&session),
            rx,
            outbound,
        ));
        SessionQueue {
            session,
            tx: Mutex::new(Some(tx)),
            worker,
        }
    }
}

async fn run_worker(
    dispatcher: Arc<CommandDispatcher>,
    session: Arc<Session>,
    mut rx: mpsc::Receiver<Sequenced<Request>>,
    outbound: mpsc::UnboundedSender<Sequenced<Response>>,
) {
    while let Some(Sequenced { sequence, item }) = rx.recv().await {
        debug!("Session {}: handling request #{}", session.id(), sequence);
        let response = dispatcher.handle(&session, item).await;
        if outbound
            .send(Sequenced {
                sequence,
                item: response,
            })
            .is_err()
        {
            debug!(
                "Session {}: response sink closed, dropping remaining requests",
                session.id()
            );
            break;
        }
    }
}

/// The inbound side of a session's worker.
pub struct SessionQueue {
    session: Arc<Session>,
    tx: Mutex<Option<mpsc::Sender<Sequenced<Request>>>>,
    worker: JoinHandle<()>,
}

impl SessionQueue {
    /// Enqueues `request` and returns the sequence number it was given.
    ///
    /// Numbering and enqueueing happen under one lock, so concurrent producers
    /// get sequence numbers that match the order the worker sees.
    pub async fn submit(&self, request: Request) -> Result<u64, GatewayError> {
        let tx = self.tx.lock().await;
        let tx = tx
            .as_ref()
            .ok_or_else(|| GatewayError::Internal("session queue is closed".to_string()))?;
        let sequence = self.session.next_sequence();
        tx.send(Sequenced {
            sequence,
            item: request,
        })
        .await
        .map_err(|_| GatewayError::Internal("session worker has stopped".to_string()))?;
        Ok(sequence)
    }

    /// Stops accepting requests and waits until everything already queued has
    /// been answered.
    pub async fn finish(self) {
        self.tx.lock().await.take();
        if let Err(e) = self.worker.await {
            if e.is_panic() {
                warn!("Session {}: worker panicked: {:?}", self.session.id(), e);
            }
        }
    }

    /// Abandons queued requests. A command already running on the backend is
    /// dropped at its next suspension point.
    pub fn abort(self) {
        self.worker.abort();
    }
}
