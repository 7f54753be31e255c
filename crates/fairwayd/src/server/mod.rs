//! TCP server for the Fairway daemon.
//!
//! The server:
//! - Listens on a TCP address for bay agent connections
//! - Performs the identity handshake and registers each agent
//! - Spawns a ConnectionHandler (the router loop) per agent
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    BayServer    │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐      ┌─────────────────┐
//! │ConnectionHandler│─────▶│  RegistryHandle │
//! │   (per agent)   │      │                 │
//! └─────────────────┘      └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, DEFAULT_HANDSHAKE_TIMEOUT};

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::registry::RegistryHandle;

/// Default listen address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9999";

/// TCP server for the Fairway daemon.
///
/// Owns the bound listener; `run` consumes the server and accepts until
/// the cancellation token fires.
pub struct BayServer {
    /// Bound listener
    listener: TcpListener,

    /// Handshake deadline applied to every new connection
    handshake_timeout: Duration,

    /// Handle to the bay registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,
}

impl BayServer {
    /// Binds the listen address and prepares the server.
    ///
    /// A bind failure is a fatal startup error.
    pub async fn bind(
        listen_addr: &str,
        handshake_timeout: Duration,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(listen_addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: listen_addr.to_string(),
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            handshake_timeout,
            registry,
            cancel_token,
        })
    }

    /// Returns the actual bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Listener(e.to_string()))
    }

    /// Runs the accept loop until the cancellation token is triggered.
    ///
    /// Each accepted connection is handed to its own task immediately; the
    /// accept loop never waits on any single agent.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Bay server listening");

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            self.handle_connection(stream, peer_addr);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }
            }
        }

        info!("Bay server stopped");
        Ok(())
    }

    /// Spawns a handler task for a newly accepted connection.
    fn handle_connection(&self, stream: tokio::net::TcpStream, peer_addr: SocketAddr) {
        // Commands are single small lines; don't let Nagle sit on them.
        let _ = stream.set_nodelay(true);

        // Child token: server shutdown retires every connection, and the
        // registry can retire this one alone.
        let cancel = self.cancel_token.child_token();
        let registry = self.registry.clone();
        let handshake_timeout = self.handshake_timeout;

        tokio::spawn(async move {
            ConnectionHandler::new(stream, peer_addr, registry, cancel, handshake_timeout)
                .run()
                .await;
        });
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("listener error: {0}")]
    Listener(String),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
}
