// tests/integration/test_helpers.rs

//! Test helpers and utilities for integration tests

#![allow(dead_code)]

use lildb_gateway::client::{ClientOptions, GatewayClient};
use lildb_gateway::config::{BackendConfig, Config, DriverKind};
use lildb_gateway::core::backend::MemoryDriver;
use lildb_gateway::core::{CommandDispatcher, ConnectionRegistry, GatewayState, SessionManager};
use lildb_gateway::server;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Installs a test-friendly subscriber once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("warn"))
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Backend settings with short retry delays so failure paths stay fast.
pub fn test_backend_config() -> BackendConfig {
    BackendConfig {
        driver: DriverKind::Memory,
        connect_retries: 2,
        retry_delay: Duration::from_millis(10),
        command_timeout: Duration::from_secs(5),
        ..BackendConfig::default()
    }
}

/// An in-process gateway core wired to a loopback backend.
pub struct TestContext {
    pub driver: Arc<MemoryDriver>,
    pub registry: Arc<ConnectionRegistry>,
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<CommandDispatcher>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_driver(MemoryDriver::new())
    }

    pub fn with_driver(driver: MemoryDriver) -> Self {
        init_tracing();
        let config = test_backend_config();
        let driver = Arc::new(driver);
        let registry = Arc::new(ConnectionRegistry::new(driver.clone(), &config));
        let sessions = Arc::new(SessionManager::new(registry.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(
            sessions.clone(),
            config.command_timeout,
        ));
        Self {
            driver,
            registry,
            sessions,
            dispatcher,
        }
    }
}

/// A gateway server on an ephemeral port, backed by a loopback driver.
pub struct TestServer {
    pub addr: SocketAddr,
    pub driver: Arc<MemoryDriver>,
    pub state: Arc<GatewayState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_driver(MemoryDriver::new()).await
    }

    pub async fn with_driver(driver: MemoryDriver) -> Self {
        init_tracing();
        let config = Config {
            port: 0,
            backend: test_backend_config(),
            ..Config::default()
        };
        let driver = Arc::new(driver);
        let ctx = server::setup(config, driver.clone())
            .await
            .expect("Failed to set up test server");
        let addr = ctx.local_addr().expect("Listener has no local address");
        let state = ctx.state.clone();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server::serve(ctx, async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            driver,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    pub async fn client(&self) -> GatewayClient {
        GatewayClient::connect(&self.addr.to_string(), &ClientOptions::default())
            .await
            .expect("Failed to connect test client")
    }

    /// Waits until the server has exactly `expected` open sessions.
    pub async fn wait_for_sessions(&self, expected: usize) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        while self.state.sessions.active_sessions() != expected {
            assert!(
                Instant::now() < deadline,
                "expected {} sessions, still have {}",
                expected,
                self.state.sessions.active_sessions()
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until the reference count of `address` equals `expected`
    /// (`None` meaning no live connection).
    pub async fn wait_for_ref_count(&self, address: &str, expected: Option<usize>) {
        let deadline = Instant::now() + WAIT_TIMEOUT;
        loop {
            let current = self.state.registry.ref_count(address).await;
            if current == expected {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "expected ref count {:?} for {}, still {:?}",
                expected,
                address,
                current
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), &mut self.handle)
            .await
            .expect("Server did not shut down in time")
            .expect("Server task panicked");
    }
}
