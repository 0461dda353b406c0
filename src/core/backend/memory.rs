// src/core/backend/memory.rs

//! An in-process loopback backend.
//!
//! `MemoryDriver` echoes every command back as its output. It keeps counters of
//! opened and closed links and a log of executed commands, and can be told to
//! refuse addresses or fail specific commands, which makes it the driver of
//! choice for smoke runs and tests.

use super::{BackendDriver, BackendHandle};
use crate::core::errors::DriverError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// A command observed by the loopback backend, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedCommand {
    pub address: String,
    pub command: String,
}

#[derive(Debug, Default)]
struct Shared {
    opens: AtomicUsize,
    closes: AtomicUsize,
    executed: Mutex<Vec<ExecutedCommand>>,
    opened_addresses: Mutex<Vec<String>>,
    closed_addresses: Mutex<Vec<String>>,
    unreachable: RwLock<HashSet<String>>,
    rejected: RwLock<HashSet<String>>,
    failing_commands: RwLock<HashSet<String>>,
}

/// The loopback driver. See the module documentation.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    shared: Arc<Shared>,
    open_delay: Duration,
    run_delay: Duration,
    close_delay: Duration,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `open` suspend for `delay` before completing.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Makes every `run` suspend for `delay` before producing output.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Makes every `close` suspend for `delay` before the link counts as closed.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// Future opens of `address` fail as unreachable.
    pub fn mark_unreachable(&self, address: &str) {
        self.shared.unreachable.write().insert(address.to_string());
    }

    /// Future opens of `address` are refused by the backend.
    pub fn mark_rejected(&self, address: &str) {
        self.shared.rejected.write().insert(address.to_string());
    }

    /// Clears any refusal previously set for `address`.
    pub fn mark_available(&self, address: &str) {
        self.shared.unreachable.write().remove(address);
        self.shared.rejected.write().remove(address);
    }

    /// Runs of exactly `command` fail with a backend error.
    pub fn fail_command(&self, command: &str) {
        self.shared
            .failing_commands
            .write()
            .insert(command.to_string());
    }

    /// Number of links successfully opened so far.
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Number of links closed so far.
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Number of links successfully opened to `address`.
    pub fn opens_for(&self, address: &str) -> usize {
        self.shared
            .opened_addresses
            .lock()
            .iter()
            .filter(|a| a.as_str() == address)
            .count()
    }

    /// Number of links to `address` that have been closed.
    pub fn closes_for(&self, address: &str) -> usize {
        self.shared
            .closed_addresses
            .lock()
            .iter()
            .filter(|a| a.as_str() == address)
            .count()
    }

    /// Links currently open.
    pub fn live_links(&self) -> usize {
        self.opens().saturating_sub(self.closes())
    }

    /// Every command run so far, in execution order.
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.shared.executed.lock().clone()
    }
}

#[async_trait]
impl BackendDriver for MemoryDriver {
    async fn open(&self, address: &str) -> Result<Box<dyn BackendHandle>, DriverError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.shared.unreachable.read().contains(address) {
            return Err(DriverError::Unreachable(format!(
                "no route to backend at {address}"
            )));
        }
        if self.shared.rejected.read().contains(address) {
            return Err(DriverError::Rejected(format!(
                "backend at {address} refused the connection"
            )));
        }

        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        self.shared
            .opened_addresses
            .lock()
            .push(address.to_string());
        debug!("Loopback link opened to {}", address);

        Ok(Box::new(MemoryHandle {
            address: address.to_string(),
            shared: self.shared.clone(),
            run_delay: self.run_delay,
            close_delay: self.close_delay,
        }))
    }
}

/// A loopback link bound to one address.
struct MemoryHandle {
    address: String,
    shared: Arc<Shared>,
    run_delay: Duration,
    close_delay: Duration,
}

#[async_trait]
impl BackendHandle for MemoryHandle {
    async fn run(&self, command: &str) -> Result<String, DriverError> {
        // Recorded before the delay so the log reflects the order runs started in.
        self.shared.executed.lock().push(ExecutedCommand {
            address: self.address.clone(),
            command: command.to_string(),
        });
        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }
        if self.shared.failing_commands.read().contains(command) {
            return Err(DriverError::Failure(format!("command '{command}' failed")));
        }
        Ok(command.to_string())
    }

    async fn close(&self) {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.shared
            .closed_addresses
            .lock()
            .push(self.address.clone());
        debug!("Loopback link to {} closed", self.address);
    }
}
