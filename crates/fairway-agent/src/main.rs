//! Fairway Agent - bay-side daemon client
//!
//! Connects this machine to a fairwayd daemon and obeys session commands.
//! The binary is headless: it logs session events where a kiosk shell
//! would render them.
//!
//! # Usage
//!
//! ```bash
//! # Connect to a daemon
//! fairway-agent --server 192.168.1.10:9999 --name Bay-1
//!
//! # Report a fixed IP instead of the connection's local address
//! fairway-agent --server 192.168.1.10:9999 --name Bay-1 --ip 10.0.0.5
//!
//! # Enable debug logging
//! RUST_LOG=fairway_agent=debug fairway-agent --server 192.168.1.10:9999
//! ```

use std::env;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fairway_agent::{AgentClient, AgentConfig, AgentEvent, CommandLocker};

/// Fairway bay agent
#[derive(Parser, Debug)]
#[command(name = "fairway-agent", version, about)]
struct Args {
    /// Daemon address, host:port
    #[arg(long, default_value = "127.0.0.1:9999")]
    server: String,

    /// Bay name reported to the daemon (defaults to the hostname)
    #[arg(long)]
    name: Option<String>,

    /// IP to report as identity (defaults to the connection's local address)
    #[arg(long)]
    ip: Option<String>,
}

/// Best-effort machine name for the handshake.
fn default_bay_name() -> String {
    env::var("HOSTNAME").unwrap_or_else(|_| "bay".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fairway_agent=info".parse()?)
                .add_directive("fairway_protocol=info".parse()?),
        )
        .init();

    let config = AgentConfig {
        server_addr: args.server,
        bay_name: args.name.unwrap_or_else(default_bay_name),
        report_ip: args.ip,
        ..Default::default()
    };

    info!(
        server = %config.server_addr,
        name = %config.bay_name,
        "Fairway agent starting"
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<AgentEvent>();
    let (_command_tx, command_rx) = mpsc::unbounded_channel();
    let cancel_token = CancellationToken::new();

    // Ctrl-C cancels everything.
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Error waiting for Ctrl+C");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let client = AgentClient::new(
        config,
        Box::new(CommandLocker::platform_default()),
        event_tx,
        command_rx,
        cancel_token.clone(),
    );
    let client_handle = tokio::spawn(async move { client.run().await });

    // Event loop: a kiosk shell would render these; the binary logs them.
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,

            event = event_rx.recv() => match event {
                Some(AgentEvent::Connected) => info!("Connected to daemon"),
                Some(AgentEvent::Disconnected) => info!("Disconnected from daemon"),
                Some(AgentEvent::SessionStarted { minutes }) => {
                    info!(minutes, "Session started");
                }
                Some(AgentEvent::TimeAdjusted { remaining_seconds }) => {
                    info!(remaining_seconds, "Session time adjusted");
                }
                Some(AgentEvent::SessionEnded) => info!("Session ended"),
                Some(AgentEvent::ExtensionDecided { approved, minutes }) => {
                    info!(approved, minutes, "Extension decided");
                }
                Some(AgentEvent::SessionExpired) => info!("Session expired"),
                None => break,
            }
        }
    }

    cancel_token.cancel();
    let _ = client_handle.await;

    info!("Fairway agent stopped");
    Ok(())
}
