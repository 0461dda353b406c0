// src/core/session/manager.rs

//! Defines the `SessionManager`, which owns the set of open sessions and
//! applies connect, disconnect and teardown to them against the registry.

use super::state::{Session, SessionId, SessionPhase};
use crate::core::errors::{ConnectError, DisconnectError};
use crate::core::metrics;
use crate::core::protocol::{ConnectResponse, DisconnectResponse};
use crate::core::registry::{ConnectionRef, ConnectionRegistry};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// What a successful connect did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The session took a reference on the connection.
    Connected(ConnectionRef),
    /// The session was already bound to this address; nothing changed.
    AlreadyConnected(String),
}

impl ConnectOutcome {
    pub fn message(&self) -> String {
        match self {
            ConnectOutcome::Connected(r) => format!("connected to {}", r.address),
            ConnectOutcome::AlreadyConnected(address) => format!("already connected to {address}"),
        }
    }
}

pub struct SessionManager {
    registry: Arc<ConnectionRegistry>,
    sessions: DashMap<SessionId, Arc<Session>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Creates an unbound session for a newly opened stream.
    pub fn open_stream(&self, peer: Option<SocketAddr>) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, peer));
        self.sessions.insert(id, session.clone());
        metrics::SESSIONS_OPENED_TOTAL.inc();
        metrics::ACTIVE_SESSIONS.inc();
        match peer {
            Some(addr) => info!("Session {} opened for {}", id, addr),
            None => info!("Session {} opened", id),
        }
        session
    }

    /// Binds `session` to `address`, taking a reference on its connection.
    ///
    /// A session holds at most one binding: connecting to a different address
    /// while bound fails with `AlreadyBound`, and connecting again to the bound
    /// address is a no-op.
    pub async fn connect(
        &self,
        session: &Session,
        address: &str,
    ) -> Result<ConnectOutcome, ConnectError> {
        let address = address.trim();
        let mut phase = session.lock().await;
        match &*phase {
            SessionPhase::Terminated => return Err(ConnectError::SessionTerminated),
            SessionPhase::Bound(current) if current == address => {
                return Ok(ConnectOutcome::AlreadyConnected(current.clone()));
            }
            SessionPhase::Bound(current) => return Err(ConnectError::AlreadyBound(current.clone())),
            SessionPhase::Unbound => {}
        }
        if address.is_empty() {
            return Err(ConnectError::Rejected("address cannot be empty".to_string()));
        }

        let connection = self.registry.connect(address).await?;
        *phase = SessionPhase::Bound(address.to_string());
        info!(
            "Session {} bound to {} (connection #{}, refs={})",
            session.id(),
            address,
            connection.id,
            connection.ref_count
        );
        Ok(ConnectOutcome::Connected(connection))
    }

    /// Drops `session`'s binding to `address`.
    pub async fn disconnect(&self, session: &Session, address: &str) -> Result<(), DisconnectError> {
        let address = address.trim();
        let mut phase = session.lock().await;
        if *phase == SessionPhase::Terminated {
            return Err(DisconnectError::SessionTerminated);
        }
        if !self.registry.contains(address).await {
            return Err(DisconnectError::NotFound);
        }
        let bound_here = matches!(&*phase, SessionPhase::Bound(current) if current == address);
        if !bound_here {
            return Err(DisconnectError::NotBound(address.to_string()));
        }

        let remaining = self.registry.disconnect(address).await?;
        *phase = SessionPhase::Unbound;
        info!(
            "Session {} unbound from {} (refs={})",
            session.id(),
            address,
            remaining
        );
        Ok(())
    }

    /// Tears `session` down, releasing its connection reference.
    ///
    /// Returns `false` if the session was already terminated; a repeated close
    /// does nothing.
    pub async fn close_stream(&self, session: &Session) -> bool {
        let mut phase = session.lock().await;
        let previous = std::mem::replace(&mut *phase, SessionPhase::Terminated);
        match previous {
            SessionPhase::Terminated => {
                debug!("Session {} already closed", session.id());
                return false;
            }
            SessionPhase::Bound(address) => {
                self.registry.release(&address).await;
                info!("Session {} closed, released {}", session.id(), address);
            }
            SessionPhase::Unbound => {
                info!("Session {} closed", session.id());
            }
        }
        drop(phase);

        self.sessions.remove(&session.id());
        metrics::ACTIVE_SESSIONS.dec();
        true
    }

    /// Handles a connect request, converting the outcome into its wire response.
    pub async fn handle_connect(&self, session: &Session, address: &str) -> ConnectResponse {
        match self.connect(session, address).await {
            Ok(outcome) => ConnectResponse {
                success: true,
                message: outcome.message(),
            },
            Err(e) => {
                info!("Session {} connect to {} failed: {}", session.id(), address, e);
                ConnectResponse {
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Handles a disconnect request, converting the outcome into its wire response.
    pub async fn handle_disconnect(&self, session: &Session, address: &str) -> DisconnectResponse {
        match self.disconnect(session, address).await {
            Ok(()) => DisconnectResponse {
                success: true,
                message: format!("disconnected from {}", address.trim()),
            },
            Err(e) => {
                info!(
                    "Session {} disconnect from {} failed: {}",
                    session.id(),
                    address,
                    e
                );
                DisconnectResponse {
                    success: false,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Looks up an open session by id.
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    /// Number of sessions that have been opened and not yet closed.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}
