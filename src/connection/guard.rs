// src/connection/guard.rs

//! Defines `SessionGuard`, an RAII guard that guarantees session teardown.

use crate::core::session::{Session, SessionManager};
use std::sync::Arc;
use tracing::{debug, warn};

/// Ensures a session is torn down, and its connection reference released,
/// however the connection handler's scope is exited.
///
/// The handler normally calls `close`. If the handler is cancelled first (a
/// panic, or the accept loop aborting it at shutdown) the guard's `Drop`
/// schedules the teardown instead. Teardown itself is idempotent, so a
/// reference is never released twice.
pub struct SessionGuard {
    sessions: Arc<SessionManager>,
    session: Arc<Session>,
    closed: bool,
}

impl SessionGuard {
    pub fn new(sessions: Arc<SessionManager>, session: Arc<Session>) -> Self {
        Self {
            sessions,
            session,
            closed: false,
        }
    }

    /// Tears the session down and waits for it to finish.
    ///
    /// The teardown runs on its own task, so cancelling the caller part-way
    /// through cannot leave a reference half-released.
    pub async fn close(mut self) -> bool {
        self.closed = true;
        let sessions = self.sessions.clone();
        let session = self.session.clone();
        match tokio::spawn(async move { sessions.close_stream(&session).await }).await {
            Ok(closed) => closed,
            Err(e) => {
                warn!("Teardown of session {} failed: {}", self.session.id(), e);
                false
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        debug!(
            "SessionGuard dropped without close, scheduling teardown of session {}",
            self.session.id()
        );
        let sessions = self.sessions.clone();
        let session = self.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    sessions.close_stream(&session).await;
                });
            }
            Err(_) => warn!(
                "No runtime available to tear down session {}; its connection reference is leaked",
                self.session.id()
            ),
        }
    }
}
