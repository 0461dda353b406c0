// src/client.rs

//! A client for the gateway's envelope protocol, used by `lildbsh` and the
//! end-to-end tests.
//!
//! The client is strictly request/response: it sends one envelope and waits
//! for the matching answer before the next. The server answers every request
//! on a stream in order, so no correlation ids are needed.

use crate::core::errors::GatewayError;
use crate::core::protocol::envelope::DEFAULT_MAX_FRAME_BYTES;
use crate::core::protocol::{
    ClientCodec, CommandResponse, ConnectResponse, DisconnectResponse, Request, Response,
};
use crate::stream::ClientStream;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, rustls};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// TLS settings for reaching a gateway that has TLS enabled.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM file with the CA certificate(s) to trust. The public web roots are
    /// used when absent.
    pub ca_cert: Option<String>,
    /// Name to verify the server certificate against, when it differs from
    /// the host part of the address.
    pub domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub attempts: u32,
    pub retry_delay: Duration,
    pub max_frame_bytes: usize,
    pub tls: Option<TlsOptions>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(1),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            tls: None,
        }
    }
}

pub struct GatewayClient {
    framed: Framed<ClientStream, ClientCodec>,
}

impl GatewayClient {
    /// Connects to the gateway at `address` (`host:port`), retrying up to
    /// `options.attempts` times.
    pub async fn connect(address: &str, options: &ClientOptions) -> Result<Self, GatewayError> {
        let attempts = options.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match Self::connect_once(address, options).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    warn!(
                        "Attempt {}/{} to reach gateway at {} failed: {}",
                        attempt, attempts, address, e
                    );
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(options.retry_delay).await;
            }
        }
        Err(last_error.unwrap_or_else(|| {
            GatewayError::Internal(format!("could not reach gateway at {address}"))
        }))
    }

    async fn connect_once(address: &str, options: &ClientOptions) -> Result<Self, GatewayError> {
        let tcp_stream = TcpStream::connect(address).await?;
        tcp_stream.set_nodelay(true)?;

        let stream = match &options.tls {
            Some(tls) => {
                info!("Establishing TLS connection with gateway at {address}");
                let connector = tls_connector(tls)?;
                let name = tls
                    .domain
                    .clone()
                    .unwrap_or_else(|| host_part(address).to_string());
                let domain = rustls::pki_types::ServerName::try_from(name)
                    .map_err(|_| GatewayError::Internal("Invalid TLS domain name".into()))?;
                let tls_stream = connector
                    .connect(domain, tcp_stream)
                    .await
                    .map_err(|e| GatewayError::Internal(format!("TLS handshake failed: {e}")))?;
                ClientStream::Tls(Box::new(tls_stream))
            }
            None => ClientStream::Tcp(tcp_stream),
        };

        debug!("Connected to gateway at {}", address);
        Ok(Self {
            framed: Framed::new(stream, ClientCodec::new(options.max_frame_bytes)),
        })
    }

    /// Sends one request and waits for its response.
    pub async fn request(&mut self, request: Request) -> Result<Response, GatewayError> {
        self.framed.send(request).await?;
        match self.framed.next().await {
            Some(result) => result,
            None => Err(GatewayError::Io(Arc::new(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "gateway closed the stream",
            )))),
        }
    }

    pub async fn command(&mut self, command: &str) -> Result<CommandResponse, GatewayError> {
        match self.request(Request::command(command)).await? {
            Response::Command(response) => Ok(response),
            other => Err(unexpected("command", &other)),
        }
    }

    pub async fn connect_backend(&mut self, ip: &str) -> Result<ConnectResponse, GatewayError> {
        match self.request(Request::connect(ip)).await? {
            Response::Connect(response) => Ok(response),
            other => Err(unexpected("connect", &other)),
        }
    }

    pub async fn disconnect_backend(
        &mut self,
        ip: &str,
    ) -> Result<DisconnectResponse, GatewayError> {
        match self.request(Request::disconnect(ip)).await? {
            Response::Disconnect(response) => Ok(response),
            other => Err(unexpected("disconnect", &other)),
        }
    }

    /// Sends several requests before reading any response, then collects the
    /// responses in order.
    pub async fn pipeline(&mut self, requests: Vec<Request>) -> Result<Vec<Response>, GatewayError> {
        let count = requests.len();
        for request in requests {
            self.framed.feed(request).await?;
        }
        self.framed.flush().await?;

        let mut responses = Vec::with_capacity(count);
        while responses.len() < count {
            match self.framed.next().await {
                Some(result) => responses.push(result?),
                None => {
                    return Err(GatewayError::Io(Arc::new(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("gateway closed the stream after {} responses", responses.len()),
                    ))));
                }
            }
        }
        Ok(responses)
    }

    /// Closes the stream. The gateway releases the session's connection.
    pub async fn close(mut self) -> Result<(), GatewayError> {
        self.framed.close().await
    }
}

fn unexpected(expected: &str, got: &Response) -> GatewayError {
    GatewayError::Protocol(format!("expected a {expected} response, got {got:?}"))
}

fn tls_connector(options: &TlsOptions) -> Result<TlsConnector, GatewayError> {
    let mut root_cert_store = rustls::RootCertStore::empty();
    match &options.ca_cert {
        Some(path) => {
            let certs = crate::server::load_certs(path)
                .map_err(|e| GatewayError::Internal(e.to_string()))?;
            for cert in certs {
                root_cert_store
                    .add(cert)
                    .map_err(|e| GatewayError::Internal(format!("Invalid CA certificate: {e}")))?;
            }
        }
        None => root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(tls_config)))
}

/// Strips the port (and IPv6 brackets) from `host:port`.
pub fn host_part(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[')
        && let Some(end) = rest.find(']')
    {
        return &rest[..end];
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
        _ => address,
    }
}
