// src/core/backend/mod.rs

//! The seam between the gateway and the database it fronts.
//!
//! The gateway never interprets command text. It asks a `BackendDriver` to open
//! a link to an address and then hands command strings to the returned
//! `BackendHandle`, relaying whatever text comes back.

pub mod memory;

use crate::config::{BackendConfig, DriverKind};
use crate::core::errors::DriverError;
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::MemoryDriver;

/// Opens links to backend addresses.
#[async_trait]
pub trait BackendDriver: Send + Sync + 'static {
    /// Establishes a new link to `address`.
    async fn open(&self, address: &str) -> Result<Box<dyn BackendHandle>, DriverError>;
}

/// A live link to one backend address.
///
/// A handle may be shared by several sessions at once, so implementations must
/// tolerate concurrent `run` calls. The registry drives each `run` and `close`
/// on its own task, so a call is never dropped half-way.
#[async_trait]
pub trait BackendHandle: Send + Sync + 'static {
    /// Executes `command` and returns its textual output.
    async fn run(&self, command: &str) -> Result<String, DriverError>;

    /// Releases the underlying resource. Called exactly once, after the last
    /// session using the link has gone.
    async fn close(&self);
}

/// Builds the driver selected in the `[backend]` section of the configuration.
pub fn driver_from_config(config: &BackendConfig) -> Arc<dyn BackendDriver> {
    match config.driver {
        DriverKind::Memory => Arc::new(MemoryDriver::new()),
    }
}
