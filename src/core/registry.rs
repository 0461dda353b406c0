// src/core/registry.rs

//! Defines the `ConnectionRegistry`, the sole owner of live backend links.
//!
//! Links are keyed by address and shared by every session bound to that
//! address. Each address has a slot guarded by its own async mutex; the slot
//! holds the link and the number of sessions referencing it. Creating a slot
//! goes through the map's entry API, so the question "does a link for this
//! address exist?" is answered and acted upon atomically, and concurrent first
//! connects to one address open exactly one backend link.
//!
//! A slot is *retired* when its link is closed, or when its first open fails
//! or is abandoned by a cancelled caller. A retired slot is removed from the
//! map before its lock is released, so anyone who was waiting on it simply
//! starts over with a fresh slot.
//!
//! Backend `run` and `close` calls are driven on their own tasks. A caller that
//! is dropped mid-call (a command timeout, a session torn down at shutdown)
//! never leaves a link with half an exchange on it.

use crate::config::BackendConfig;
use crate::core::backend::{BackendDriver, BackendHandle};
use crate::core::errors::{ConnectError, DisconnectError, DriverError};
use crate::core::metrics;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Identifies one backend link for its whole lifetime. Never reused.
pub type ConnectionId = u64;

/// A live link to one backend address.
pub struct Connection {
    id: ConnectionId,
    address: String,
    handle: Arc<dyn BackendHandle>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Runs `command` on the backend link.
    ///
    /// The exchange completes even if this future is dropped; its output is
    /// then discarded.
    pub async fn run(&self, command: &str) -> Result<String, DriverError> {
        let handle = Arc::clone(&self.handle);
        let command = command.to_string();
        tokio::spawn(async move { handle.run(&command).await })
            .await
            .map_err(|e| DriverError::Failure(format!("backend run did not complete: {e}")))?
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// The result of a successful `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRef {
    pub id: ConnectionId,
    pub address: String,
    /// The reference count right after this connect was applied.
    pub ref_count: usize,
    /// True if this call opened the backend link.
    pub opened: bool,
}

#[derive(Default)]
struct SlotState {
    connection: Option<Arc<Connection>>,
    ref_count: usize,
    retired: bool,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
}

/// A slot's lock held across a backend open. Unless `keep` is set, dropping it
/// retires the slot and removes it from the map while the lock is still held.
/// That covers both a failed open and a caller cancelled mid-open.
struct OpeningSlot<'a> {
    slots: &'a DashMap<String, Arc<Slot>>,
    address: &'a str,
    slot: &'a Arc<Slot>,
    state: MutexGuard<'a, SlotState>,
    keep: bool,
}

impl Drop for OpeningSlot<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        self.state.retired = true;
        self.slots
            .remove_if(self.address, |_, s| Arc::ptr_eq(s, self.slot));
        debug!("Retired unopened slot for {}", self.address);
    }
}

/// Owns every live backend link. See the module documentation.
pub struct ConnectionRegistry {
    driver: Arc<dyn BackendDriver>,
    slots: DashMap<String, Arc<Slot>>,
    next_id: AtomicU64,
    connect_retries: u32,
    retry_delay: Duration,
}

impl ConnectionRegistry {
    pub fn new(driver: Arc<dyn BackendDriver>, config: &BackendConfig) -> Self {
        Self {
            driver,
            slots: DashMap::new(),
            next_id: AtomicU64::new(1),
            connect_retries: config.connect_retries.max(1),
            retry_delay: config.retry_delay,
        }
    }

    /// Takes a reference on the link to `address`, opening it if necessary.
    ///
    /// On failure nothing is registered.
    pub async fn connect(&self, address: &str) -> Result<ConnectionRef, ConnectError> {
        loop {
            let slot = self
                .slots
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(Slot::default()))
                .clone();
            let mut state = slot.state.lock().await;

            if state.retired {
                continue;
            }

            if let Some(id) = state.connection.as_ref().map(|c| c.id) {
                state.ref_count += 1;
                debug!(
                    "Reusing connection #{} to {} (refs={})",
                    id, address, state.ref_count
                );
                return Ok(ConnectionRef {
                    id,
                    address: address.to_string(),
                    ref_count: state.ref_count,
                    opened: false,
                });
            }

            // The slot is new; open under its lock so concurrent connects to this
            // address wait for the outcome.
            let mut opening = OpeningSlot {
                slots: &self.slots,
                address,
                slot: &slot,
                state,
                keep: false,
            };
            match self.open_with_retries(address).await {
                Ok(handle) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    opening.state.connection = Some(Arc::new(Connection {
                        id,
                        address: address.to_string(),
                        handle: Arc::from(handle),
                    }));
                    opening.state.ref_count = 1;
                    opening.keep = true;
                    metrics::BACKEND_OPENS_TOTAL.inc();
                    metrics::LIVE_CONNECTIONS.inc();
                    info!("Opened connection #{} to {}", id, address);
                    return Ok(ConnectionRef {
                        id,
                        address: address.to_string(),
                        ref_count: 1,
                        opened: true,
                    });
                }
                Err(e) => {
                    metrics::BACKEND_OPEN_FAILURES_TOTAL.inc();
                    warn!("Failed to open connection to {}: {}", address, e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Drops one reference on the link to `address`, closing the link when the
    /// count reaches zero. Returns the remaining count.
    pub async fn disconnect(&self, address: &str) -> Result<usize, DisconnectError> {
        let slot = self
            .slots
            .get(address)
            .map(|s| Arc::clone(s.value()))
            .ok_or(DisconnectError::NotFound)?;
        let mut state = slot.state.lock().await;

        if state.retired || state.connection.is_none() {
            return Err(DisconnectError::NotFound);
        }

        state.ref_count = state.ref_count.saturating_sub(1);
        let remaining = state.ref_count;
        if remaining == 0 {
            let connection = state.connection.take();
            state.retired = true;
            self.slots.remove_if(address, |_, s| Arc::ptr_eq(s, &slot));
            drop(state);
            if let Some(connection) = connection {
                metrics::BACKEND_CLOSES_TOTAL.inc();
                metrics::LIVE_CONNECTIONS.dec();
                info!("Closing connection #{} to {}", connection.id, address);
                close_link(connection).await;
            }
        } else {
            debug!("Released a reference to {} (refs={})", address, remaining);
        }
        Ok(remaining)
    }

    /// Teardown variant of `disconnect` used when a session goes away. There is
    /// no client left to report to, so failures are only logged.
    pub async fn release(&self, address: &str) {
        if let Err(e) = self.disconnect(address).await {
            warn!(
                "Release of {} during session teardown found no connection: {}",
                address, e
            );
        }
    }

    /// Returns the live link for `address`, if any.
    pub async fn lookup(&self, address: &str) -> Option<Arc<Connection>> {
        let slot = self.slots.get(address).map(|s| Arc::clone(s.value()))?;
        let state = slot.state.lock().await;
        if state.retired {
            return None;
        }
        state.connection.clone()
    }

    /// Current reference count of the link to `address`, or `None` if there is no link.
    pub async fn ref_count(&self, address: &str) -> Option<usize> {
        let slot = self.slots.get(address).map(|s| Arc::clone(s.value()))?;
        let state = slot.state.lock().await;
        match &state.connection {
            Some(_) if !state.retired => Some(state.ref_count),
            _ => None,
        }
    }

    /// True if a live link to `address` exists.
    pub async fn contains(&self, address: &str) -> bool {
        self.ref_count(address).await.is_some()
    }

    /// Number of registered addresses, including links still being opened.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Closes every live link regardless of its reference count. Used at shutdown.
    pub async fn close_all(&self) -> usize {
        let slots: Vec<(String, Arc<Slot>)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut closed = 0;
        for (address, slot) in slots {
            let mut state = slot.state.lock().await;
            let outstanding = state.ref_count;
            let connection = state.connection.take();
            state.ref_count = 0;
            state.retired = true;
            self.slots.remove_if(&address, |_, s| Arc::ptr_eq(s, &slot));
            drop(state);
            if let Some(connection) = connection {
                metrics::BACKEND_CLOSES_TOTAL.inc();
                metrics::LIVE_CONNECTIONS.dec();
                info!(
                    "Closing connection #{} to {} at shutdown ({} reference(s) outstanding)",
                    connection.id, address, outstanding
                );
                close_link(connection).await;
                closed += 1;
            }
        }
        closed
    }

    async fn open_with_retries(&self, address: &str) -> Result<Box<dyn BackendHandle>, DriverError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.driver.open(address).await {
                Ok(handle) => return Ok(handle),
                Err(DriverError::Unreachable(msg)) if attempt < self.connect_retries => {
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}. Retrying...",
                        attempt, self.connect_retries, address, msg
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Closes `connection` on its own task, so the close runs to completion even
/// if the caller stops waiting for it.
async fn close_link(connection: Arc<Connection>) {
    let id = connection.id;
    let address = connection.address.clone();
    let handle = Arc::clone(&connection.handle);
    if let Err(e) = tokio::spawn(async move { handle.close().await }).await {
        warn!("Closing connection #{} to {} failed: {}", id, address, e);
    }
}
