// src/core/session/state.rs

//! Defines the state associated with a single client session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, MutexGuard};

/// The internal identifier of a session. It never appears on the wire.
pub type SessionId = u64;

/// Where a session is in its lifecycle.
///
/// `Unbound -> Bound -> Unbound` through connect and disconnect; either state
/// moves to `Terminated` when the stream closes. `Terminated` is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Unbound,
    /// Holds the address whose connection this session references.
    Bound(String),
    Terminated,
}

/// Server-side state for one open client stream.
///
/// The phase sits behind an async mutex that is held for the whole of each
/// operation on the session (connect, disconnect, command execution,
/// teardown), so a session never has two of them in flight at once.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: Option<SocketAddr>,
    opened_at: Instant,
    phase: Mutex<SessionPhase>,
    /// The sequence number the next queued request will receive.
    pending_sequence: AtomicU64,
}

impl Session {
    pub(crate) fn new(id: SessionId, peer: Option<SocketAddr>) -> Self {
        Self {
            id,
            peer,
            opened_at: Instant::now(),
            phase: Mutex::new(SessionPhase::Unbound),
            pending_sequence: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The remote address of the client, when the transport has one.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// A snapshot of the current phase. Waits for any in-flight operation.
    pub async fn phase(&self) -> SessionPhase {
        self.phase.lock().await.clone()
    }

    /// The address this session is bound to, if any.
    pub async fn bound_address(&self) -> Option<String> {
        match &*self.phase.lock().await {
            SessionPhase::Bound(address) => Some(address.clone()),
            _ => None,
        }
    }

    pub async fn is_terminated(&self) -> bool {
        *self.phase.lock().await == SessionPhase::Terminated
    }

    /// Number of requests sequenced on this session so far.
    pub fn sequenced(&self) -> u64 {
        self.pending_sequence.load(Ordering::SeqCst)
    }

    /// Locks the session for one operation.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, SessionPhase> {
        self.phase.lock().await
    }

    /// Hands out the next sequence number. Callers enqueue under their own lock
    /// so numbering matches queue order.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.pending_sequence.fetch_add(1, Ordering::SeqCst)
    }
}
