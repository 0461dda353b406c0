// src/config.rs

//! Manages gateway configuration: loading, defaults, and validation.

use crate::core::protocol::envelope::DEFAULT_MAX_FRAME_BYTES;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Which backend driver the gateway forwards commands to. Drivers for real
/// databases plug in behind `BackendDriver`; the gateway ships the loopback one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// The in-process loopback backend, which echoes commands.
    #[default]
    Memory,
}

/// Settings for the links the gateway opens to backend databases.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BackendConfig {
    #[serde(default)]
    pub driver: DriverKind,
    /// Upper bound on a single command's execution. Exceeding it yields an
    /// error output, not a dropped stream.
    #[serde(with = "humantime_serde", default = "default_command_timeout")]
    pub command_timeout: Duration,
    /// How many times an unreachable backend is tried before giving up.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_connect_retries() -> u32 {
    3
}
fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            command_timeout: default_command_timeout(),
            connect_retries: default_connect_retries(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// Configuration for TLS encryption of client streams.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert_path: String,
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

fn default_cert_path() -> String {
    "lildb-gateway.crt".to_string()
}
fn default_key_path() -> String {
    "lildb-gateway.key".to_string()
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_path: default_cert_path(),
            key_path: default_key_path(),
        }
    }
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9464
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// The gateway configuration. Every field has a default, so an empty file is valid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum number of simultaneously open client streams.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Largest accepted envelope, in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Requests a session may have queued before the reader stops pulling from the socket.
    #[serde(default = "default_command_queue_depth")]
    pub command_queue_depth: usize,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    50051
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}
fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}
fn default_command_queue_depth() -> usize {
    32
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            max_frame_bytes: default_max_frame_bytes(),
            command_queue_depth: default_command_queue_depth(),
            tls: TlsConfig::default(),
            metrics: MetricsConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Invalid configuration in '{path}'"))?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to the defaults.
    pub fn from_file_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            info!(
                "No configuration file at '{}', using built-in defaults.",
                path
            );
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.max_frame_bytes < 64 {
            return Err(anyhow!("max_frame_bytes must be at least 64"));
        }
        if self.command_queue_depth == 0 {
            return Err(anyhow!("command_queue_depth cannot be 0"));
        }

        if self.backend.command_timeout.is_zero() {
            return Err(anyhow!("backend.command_timeout cannot be 0"));
        }
        if self.backend.connect_retries == 0 {
            return Err(anyhow!("backend.connect_retries must be at least 1"));
        }

        if self.tls.enabled {
            if self.tls.cert_path.trim().is_empty() {
                return Err(anyhow!("tls.cert_path cannot be empty when TLS is enabled"));
            }
            if self.tls.key_path.trim().is_empty() {
                return Err(anyhow!("tls.key_path cannot be empty when TLS is enabled"));
            }
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}
