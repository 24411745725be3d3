//! # uibridge CLI
//!
//! Runs a peer command server or sends commands to one.
//!
//! ```text
//! uibridge serve --port 9999
//! uibridge ping
//! uibridge send echo '{"data": "Hello, world!"}'
//! uibridge shutdown
//! ```
//!
//! Command results go to stdout as pretty JSON; logs go to stderr.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uibridge_client::{BridgeClient, ClientConfig, Command, Message};
use uibridge_peer::{PeerConfig, PeerServer};

/// uibridge - JSON message bridge between a host process and an embedded peer
#[derive(Parser, Debug)]
#[command(name = "uibridge", version, about, author)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Peer host
    #[arg(long, global = true, env = "UIBRIDGE_HOST")]
    pub host: Option<String>,

    /// Peer port
    #[arg(long, short, global = true, env = "UIBRIDGE_PORT")]
    pub port: Option<u16>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Reply timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Connection attempts before giving up
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run a peer command server until Ctrl-C or a `shutdown` command
    Serve,

    /// Check that a peer answers
    Ping,

    /// Send a request and print the reply payload
    Send {
        /// Action name
        action: String,

        /// Payload as a JSON value
        #[arg(default_value = "{}")]
        payload: String,
    },

    /// Ask the peer to shut down
    Shutdown,
}

impl Cli {
    /// Run the selected subcommand.
    pub async fn execute(self) -> Result<()> {
        self.init_tracing();

        match &self.command {
            Commands::Serve => self.serve().await,
            Commands::Ping => {
                let client = BridgeClient::new(self.client_config()?);
                let reply = client.send(Command::ping()).await?;
                print_json(&reply.into_value())
            }
            Commands::Send { action, payload } => {
                let payload: Value = serde_json::from_str(payload)
                    .with_context(|| format!("payload is not valid JSON: {payload}"))?;
                let client = BridgeClient::new(self.client_config()?);
                let reply = client.request(Message::request(action.as_str(), payload)).await?;
                print_json(&reply.payload)
            }
            Commands::Shutdown => {
                let client = BridgeClient::new(self.client_config()?);
                client.shutdown_peer().await?;
                print_json(&serde_json::json!({ "success": true }))
            }
        }
    }

    fn init_tracing(&self) {
        let level = if self.quiet {
            "error"
        } else {
            match self.verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        };
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        // A subscriber may already be installed when embedded in tests.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }

    /// Client configuration: file (if any), then command-line overrides.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.transport.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.request_timeout_ms = timeout_ms;
        }
        if let Some(retries) = self.retries {
            if retries == 0 {
                bail!("--retries must be at least 1");
            }
            config.transport.retry.max_attempts = retries;
        }
        debug!("Client configuration: {:?}", config);
        Ok(config)
    }

    /// Peer configuration: file (if any), then command-line overrides.
    pub fn peer_config(&self) -> Result<PeerConfig> {
        let mut config = match &self.config {
            Some(path) => {
                PeerConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?
            }
            None => PeerConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(config)
    }

    async fn serve(&self) -> Result<()> {
        let server = PeerServer::bind(self.peer_config()?).await?;
        let addr = server.local_addr()?;
        let handle = server.shutdown_handle();

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, shutting down");
                handle.shutdown();
            }
        });

        if !self.quiet {
            eprintln!("Serving on {addr}");
        }
        server.run().await?;
        Ok(())
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
