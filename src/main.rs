// src/main.rs

//! The main entry point for the LilDB gateway.

use anyhow::Result;
use clap::Parser;
use lildb_gateway::config::Config;
use lildb_gateway::core::backend::driver_from_config;
use lildb_gateway::server;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "lildb-gateway")]
#[command(version, about = "Remote shell gateway for LilDB")]
struct Cli {
    /// Path to the TOML configuration file. Defaults apply when it is missing.
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Overrides the listening port from the configuration.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::from_file_or_default(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{}\": {e:#}", cli.config);
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.port = port;
    }

    // RUST_LOG wins over the configured level.
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true),
        )
        .init();

    info!("Starting LilDB gateway {}", env!("CARGO_PKG_VERSION"));
    let driver = driver_from_config(&config.backend);

    if let Err(e) = server::run(config, driver).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }
    Ok(())
}
