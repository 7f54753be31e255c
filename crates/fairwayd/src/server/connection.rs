//! Connection handler for individual agent connections.
//!
//! Each accepted connection gets its own `ConnectionHandler` that:
//! - Performs the one-shot identity handshake
//! - Hands the write half to the registry (register-or-replace)
//! - Runs the read loop, routing inbound reports to the registry
//!
//! The handler is the only reader of its socket for the socket's whole
//! lifetime; the registry actor is the only writer.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fairway_protocol::{decode_line, AgentReport, Handshake, MAX_LINE_BYTES};

use crate::registry::{BayWriter, RegistryHandle};

/// Default handshake timeout.
///
/// A peer that dials in and never identifies itself holds a socket for at
/// most this long.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How the router loop ended.
enum LoopExit {
    /// The per-connection token fired: the entry was superseded or evicted
    /// and the registry has already accounted for this connection.
    Cancelled,

    /// The read side hit EOF, an error, or framing corruption; the registry
    /// must be told.
    Disconnected,
}

/// Connection handler for a single agent.
pub struct ConnectionHandler {
    /// Buffered reader for inbound lines (sole reader of this socket)
    reader: BufReader<OwnedReadHalf>,

    /// Write half, held only until registration transfers it to the registry
    writer: Option<BayWriter>,

    /// Transport address of the agent
    peer_addr: SocketAddr,

    /// Handle to the bay registry
    registry: RegistryHandle,

    /// Per-connection token; cancelled by the registry on eviction
    cancel: CancellationToken,

    /// Handshake deadline
    handshake_timeout: Duration,
}

impl ConnectionHandler {
    /// Creates a handler for an accepted stream.
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        registry: RegistryHandle,
        cancel: CancellationToken,
        handshake_timeout: Duration,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer: Some(BufWriter::new(writer)),
            peer_addr,
            registry,
            cancel,
            handshake_timeout,
        }
    }

    /// Runs the connection to completion: handshake, registration, then the
    /// router loop. Returns when the connection is finished either way.
    pub async fn run(mut self) {
        debug!(addr = %self.peer_addr, "Agent connected");

        let handshake = match self.handle_handshake().await {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!(addr = %self.peer_addr, error = %e, "Handshake failed, dropping connection");
                return;
            }
        };

        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => return,
        };

        let id = handshake.identity();
        match self
            .registry
            .register(handshake, self.peer_addr, writer, self.cancel.clone())
            .await
        {
            Ok(_) => {
                info!(bay = %id, addr = %self.peer_addr, "Agent registered");
            }
            Err(e) => {
                warn!(addr = %self.peer_addr, error = %e, "Registration rejected");
                return;
            }
        }

        match self.route_reports().await {
            LoopExit::Cancelled => {
                debug!(bay = %id, addr = %self.peer_addr, "Connection retired by registry");
            }
            LoopExit::Disconnected => {
                self.registry.connection_closed(self.peer_addr).await;
                info!(bay = %id, addr = %self.peer_addr, "Agent disconnected");
            }
        }
    }

    /// Reads and decodes the one-shot identity handshake.
    async fn handle_handshake(&mut self) -> Result<Handshake, ConnectionError> {
        let mut line = String::new();

        let read = timeout(self.handshake_timeout, self.reader.read_line(&mut line))
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout)?
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if read == 0 {
            return Err(ConnectionError::Eof);
        }

        if line.len() > MAX_LINE_BYTES {
            return Err(ConnectionError::MessageTooLarge {
                size: line.len(),
                max: MAX_LINE_BYTES,
            });
        }

        decode_line(&line).map_err(|e| ConnectionError::Handshake(e.to_string()))
    }

    /// The router loop: decodes inbound reports until the socket dies or
    /// the registry retires the connection.
    ///
    /// A single malformed report is logged and skipped - one bad message
    /// must not cost the session. Framing corruption (an overlong line) and
    /// read failures are disconnects.
    async fn route_reports(&mut self) -> LoopExit {
        let mut line = String::new();

        loop {
            line.clear();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    return LoopExit::Cancelled;
                }

                read = self.reader.read_line(&mut line) => match read {
                    Ok(0) => {
                        debug!(addr = %self.peer_addr, "Agent sent EOF");
                        return LoopExit::Disconnected;
                    }
                    Ok(_) => {
                        if line.len() > MAX_LINE_BYTES {
                            warn!(
                                addr = %self.peer_addr,
                                size = line.len(),
                                "Inbound line exceeds frame limit, treating as disconnect"
                            );
                            return LoopExit::Disconnected;
                        }

                        match decode_line::<AgentReport>(&line) {
                            Ok(report) => {
                                debug!(addr = %self.peer_addr, report = ?report, "Report received");
                                self.registry.report(self.peer_addr, report).await;
                            }
                            Err(e) => {
                                warn!(
                                    addr = %self.peer_addr,
                                    error = %e,
                                    line = %line.trim(),
                                    "Skipping malformed report"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        debug!(addr = %self.peer_addr, error = %e, "Read failed");
                        return LoopExit::Disconnected;
                    }
                }
            }
        }
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("invalid handshake: {0}")]
    Handshake(String),

    #[error("connection closed")]
    Eof,

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(String),
}
