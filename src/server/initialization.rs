// src/server/initialization.rs

//! Builds everything the accept loop needs: shared state, the listener, and
//! the optional TLS acceptor.

use super::context::ServerContext;
use crate::config::{Config, DriverKind};
use crate::core::backend::BackendDriver;
use crate::core::state::GatewayState;
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
///
/// The configuration is taken as already validated. A port of 0 binds an
/// ephemeral port; see `ServerContext::local_addr`.
pub async fn setup(config: Config, driver: Arc<dyn BackendDriver>) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let acceptor = setup_tls(&config)?;

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| anyhow!("Failed to bind {}:{}: {}", config.host, config.port, e))?;
    info!(
        "LilDB gateway listening on {}",
        listener.local_addr().map_or_else(
            |_| format!("{}:{}", config.host, config.port),
            |addr| addr.to_string()
        )
    );

    let connection_permits = Arc::new(Semaphore::new(config.max_clients));
    let state = GatewayState::new(config, driver);
    info!("Gateway state initialized.");

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        acceptor,
        connection_permits,
    })
}

/// Sets up the TLS acceptor if TLS is enabled in the configuration.
fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if config.tls.enabled {
        info!("TLS is enabled. Loading certificate and key.");
        let certs = load_certs(&config.tls.cert_path)?;
        let key = load_key(&config.tls.key_path)?;
        let server_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
    } else {
        Ok(None)
    }
}

/// Loads TLS certificates from a PEM file.
pub(crate) fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

fn log_startup_info(config: &Config) {
    match config.backend.driver {
        DriverKind::Memory => {
            warn!("WARNING: Using the in-memory backend. Commands are echoed, not executed.")
        }
    }
    info!(
        "Accepting up to {} clients, {} queued requests per session.",
        config.max_clients, config.command_queue_depth
    );
    info!(
        "Backend open attempts {} ({:?} apart), command timeout {:?}.",
        config.backend.connect_retries,
        config.backend.retry_delay,
        config.backend.command_timeout
    );
}
