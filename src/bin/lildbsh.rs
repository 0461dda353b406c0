// src/bin/lildbsh.rs

//! An interactive shell for the LilDB gateway.
//!
//! Lines are sent as commands. `connect <ip>` and `disconnect <ip>` bind and
//! unbind the session, and `exit` leaves the shell.
//!
//! Line editing and history come from `reedline`, which blocks, so it runs on
//! a blocking thread and hands lines to the async side over a channel. Outputs
//! come back through reedline's external printer and are drawn above the
//! prompt.

use anyhow::{Result, bail};
use clap::Parser;
use directories::ProjectDirs;
use lildb_gateway::client::{ClientOptions, GatewayClient, TlsOptions};
use reedline::{
    DefaultPrompt, DefaultPromptSegment, ExternalPrinter, FileBackedHistory, HISTORY_SIZE,
    Reedline, Signal,
};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, stdout};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const FALLBACK_HISTORY_FILE: &str = "lildb_history.txt";

#[derive(Parser, Debug)]
#[command(name = "lildbsh")]
#[command(version, about = "Shell client for the LilDB gateway", long_about = None)]
struct Cli {
    /// Gateway address as host:port. Prompted for when omitted.
    #[arg(short, long)]
    address: Option<String>,

    /// Backend to connect the session to right away.
    #[arg(short, long)]
    target: Option<String>,

    /// CA certificate (PEM) to trust. Enables TLS.
    #[arg(short = 'c', long = "cert")]
    ca_cert_path: Option<String>,

    /// Server name to verify instead of the address host. Enables TLS.
    #[arg(short = 'd', long = "domain")]
    domain_override: Option<String>,

    /// Use TLS with the public web roots.
    #[arg(long)]
    tls: bool,
}

impl Cli {
    fn client_options(&self) -> ClientOptions {
        let tls = (self.tls || self.ca_cert_path.is_some() || self.domain_override.is_some())
            .then(|| TlsOptions {
                ca_cert: self.ca_cert_path.clone(),
                domain: self.domain_override.clone(),
            });
        ClientOptions {
            tls,
            ..ClientOptions::default()
        }
    }
}

/// One parsed line of shell input.
#[derive(Debug, PartialEq, Eq)]
enum ShellInput<'a> {
    Empty,
    Exit,
    Connect(&'a str),
    Disconnect(&'a str),
    Command(&'a str),
}

fn parse_line(line: &str) -> ShellInput<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ShellInput::Empty;
    }
    if trimmed == "exit" {
        return ShellInput::Exit;
    }
    let (word, rest) = trimmed
        .split_once(char::is_whitespace)
        .map_or((trimmed, ""), |(w, r)| (w, r.trim()));
    match word {
        "connect" if !rest.is_empty() => ShellInput::Connect(rest),
        "disconnect" if !rest.is_empty() => ShellInput::Disconnect(rest),
        _ => ShellInput::Command(trimmed),
    }
}

/// Where the history lives: `history.txt` in the data directory when there is
/// one, otherwise a file in the working directory.
fn history_file_in(data_dir: Option<&Path>) -> PathBuf {
    match data_dir {
        Some(dir) => dir.join("history.txt"),
        None => PathBuf::from(FALLBACK_HISTORY_FILE),
    }
}

fn history_file() -> PathBuf {
    let dirs = ProjectDirs::from("com", "lildb", "lildbsh");
    let data_dir = dirs.as_ref().map(|d| d.data_dir()).and_then(|dir| {
        match std::fs::create_dir_all(dir) {
            Ok(()) => Some(dir),
            Err(e) => {
                warn!("Could not create history directory {}: {}", dir.display(), e);
                None
            }
        }
    });
    history_file_in(data_dir)
}

async fn prompt_for_address() -> Result<String> {
    let mut out = stdout();
    out.write_all(b"Please insert your LilDB gateway address: ")
        .await?;
    out.flush().await?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await?;
    let address = line.trim();
    if address.is_empty() {
        bail!("No gateway address given");
    }
    Ok(address.to_string())
}

/// Reads lines until `exit`, Ctrl-C, Ctrl-D or a closed channel. Blocking.
fn read_lines(mut editor: Reedline, lines: mpsc::Sender<String>) {
    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("lildb".to_string()),
        DefaultPromptSegment::Empty,
    );
    loop {
        match editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => match parse_line(&buffer) {
                ShellInput::Exit => break,
                ShellInput::Empty => {}
                _ => {
                    if lines.blocking_send(buffer).is_err() {
                        break;
                    }
                }
            },
            Ok(_) => {
                println!("\r\nAborted.");
                break;
            }
            Err(e) => {
                error!("Error reading line: {:?}", e);
                break;
            }
        }
    }
}

/// Executes lines as they arrive. Returns the target still bound when the
/// reader goes away.
async fn run_shell(
    client: &mut GatewayClient,
    mut lines: mpsc::Receiver<String>,
    mut bound: Option<String>,
    print: impl Fn(String),
) -> Result<Option<String>> {
    while let Some(line) = lines.recv().await {
        match parse_line(&line) {
            ShellInput::Empty | ShellInput::Exit => {}
            ShellInput::Connect(ip) => {
                let response = client.connect_backend(ip).await?;
                print(response.message);
                if response.success {
                    bound = Some(ip.to_string());
                }
            }
            ShellInput::Disconnect(ip) => {
                let response = client.disconnect_backend(ip).await?;
                print(response.message);
                if response.success {
                    bound = None;
                }
            }
            ShellInput::Command(command) => {
                let response = client.command(command).await?;
                print(response.output);
            }
        }
    }
    Ok(bound)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .compact()
        .init();

    let cli = Cli::parse();

    let address = match cli.address.clone() {
        Some(address) => address,
        None => prompt_for_address().await?,
    };

    let mut client = match GatewayClient::connect(&address, &cli.client_options()).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect to {}: {}", address, e);
            bail!("Exiting...");
        }
    };
    info!("Connected to gateway at {}.", address);

    let mut bound = None;
    if let Some(target) = &cli.target {
        let response = client.connect_backend(target).await?;
        println!("{}", response.message);
        if !response.success {
            bail!("Could not connect to {target}");
        }
        bound = Some(target.clone());
    }

    let history = FileBackedHistory::with_file(HISTORY_SIZE, history_file())?;
    let printer = ExternalPrinter::new(128);
    let output = printer.sender();
    let editor = Reedline::create()
        .with_history(Box::new(history))
        .with_external_printer(printer);

    let (tx, rx) = mpsc::channel(32);
    let reader = tokio::task::spawn_blocking(move || read_lines(editor, tx));
    let shell = run_shell(&mut client, rx, bound, |text| {
        if output.send(text).is_err() {
            warn!("Output printer is gone");
        }
    })
    .await;
    let bound = match shell {
        Ok(bound) => bound,
        Err(e) => {
            let _ = output.send(format!("Server connection lost: {e}. Press Enter to leave."));
            reader.await?;
            return Err(e);
        }
    };
    reader.await?;

    if let Some(target) = bound {
        let response = client.disconnect_backend(&target).await?;
        info!("{}", response.message);
    }
    client.close().await?;
    Ok(())
}
