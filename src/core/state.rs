// src/core/state.rs

//! Defines `GatewayState`, the shared state handed to every connection handler.

use crate::config::Config;
use crate::core::backend::BackendDriver;
use crate::core::dispatcher::CommandDispatcher;
use crate::core::registry::ConnectionRegistry;
use crate::core::session::SessionManager;
use std::sync::Arc;

/// Everything a connection handler needs, wired together once at startup.
pub struct GatewayState {
    pub config: Config,
    pub registry: Arc<ConnectionRegistry>,
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<CommandDispatcher>,
}

impl GatewayState {
    pub fn new(config: Config, driver: Arc<dyn BackendDriver>) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new(driver, &config.backend));
        let sessions = Arc::new(SessionManager::new(registry.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(
            sessions.clone(),
            config.backend.command_timeout,
        ));
        Arc::new(Self {
            config,
            registry,
            sessions,
            dispatcher,
        })
    }
}
