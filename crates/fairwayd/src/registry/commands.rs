//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `BayEvent`: Events published by the registry for subscribers
//!
//! All types are designed for async message passing and follow the
//! panic-free policy.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::BufWriter;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use fairway_core::{BayId, BaySnapshot, SessionStatus};
use fairway_protocol::{AgentReport, BayCommand, Handshake};

/// Buffered write half of an accepted agent connection.
///
/// Handed to the registry at registration time; the actor is the only
/// writer for the lifetime of the entry.
pub type BayWriter = BufWriter<OwnedWriteHalf>;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Request-response commands carry a oneshot channel for the reply;
/// notifications from the router and the sweeper tick are fire-and-forget.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Register a bay after a successful handshake, superseding any
    /// existing entry with the same identity.
    ///
    /// Registration transfers ownership of the connection's write half and
    /// the per-connection cancellation token to the registry. Cancelling
    /// the token is how an eviction unblocks the connection's pending read.
    Register {
        /// Decoded handshake payload
        handshake: Handshake,
        /// Transport address of this connection
        peer_addr: SocketAddr,
        /// Write half of the accepted socket
        writer: BayWriter,
        /// Token that terminates the connection's read loop
        cancel: CancellationToken,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<BaySnapshot, RegistryError>>,
    },

    /// Send one command to one bay's socket.
    ///
    /// A write failure is terminal for that socket: the entry is evicted
    /// and the caller gets `RegistryError::ConnectionLost`.
    Deliver {
        /// Identity of the target bay
        id: BayId,
        /// Command to encode and write
        command: BayCommand,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Inbound report decoded by a connection's read loop.
    Report {
        /// Transport address the report arrived on
        peer_addr: SocketAddr,
        /// The decoded report
        report: AgentReport,
    },

    /// A connection's read loop terminated (EOF, read error, or framing
    /// corruption). A no-op when the address was already superseded or
    /// evicted, which keeps removals to exactly one per address.
    ConnectionClosed {
        /// Transport address of the closed connection
        peer_addr: SocketAddr,
    },

    /// Look up the bay currently registered at a transport address.
    Get {
        peer_addr: SocketAddr,
        respond_to: oneshot::Sender<Option<BaySnapshot>>,
    },

    /// Snapshot of every registered bay.
    List {
        respond_to: oneshot::Sender<Vec<BaySnapshot>>,
    },

    /// Explicitly evict the bay at a transport address, closing its socket.
    Remove {
        peer_addr: SocketAddr,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Probe every registered socket, evicting entries whose probe fails.
    ///
    /// Fire-and-forget; issued by the sweeper task on a fixed interval.
    Sweep,
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The registry has reached its maximum bay capacity.
    #[error("registry is full (max: {max} bays)")]
    RegistryFull { max: usize },

    /// No bay is registered under this identity.
    #[error("bay not found: {0}")]
    BayNotFound(BayId),

    /// No bay is registered at this transport address.
    #[error("no bay registered at {0}")]
    AddressNotFound(SocketAddr),

    /// The bay's socket failed on write; the entry has been evicted.
    #[error("connection lost to bay {0}")]
    ConnectionLost(BayId),

    /// The outbound command could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Bay Events
// ============================================================================

/// Events published by the registry to subscribers.
///
/// This is the collaborator-facing notification stream: the presentation
/// layer subscribes here instead of being called into directly.
#[derive(Debug, Clone)]
pub enum BayEvent {
    /// A bay registered (or re-registered after a reconnect).
    Added {
        /// Snapshot of the freshly registered session
        snapshot: BaySnapshot,
    },

    /// A bay was removed from the registry.
    Removed {
        /// Identity of the removed bay
        id: BayId,
        /// Why the bay was removed
        reason: RemovalReason,
    },

    /// A bay asked for more session time; the admin decides.
    ExtensionRequested {
        id: BayId,
        /// Requested minutes
        minutes: u32,
    },

    /// A bay's session status changed.
    StatusChanged {
        id: BayId,
        status: SessionStatus,
    },
}

/// Reason why a bay was removed from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// A new handshake with the same identity replaced this entry.
    Superseded,

    /// The connection failed on read or write.
    ConnectionLost,

    /// The liveness probe failed during a sweep.
    ProbeFailed,

    /// The collaborator explicitly removed the bay.
    Explicit,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Superseded => write!(f, "superseded by reconnect"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::ProbeFailed => write!(f, "liveness probe failed"),
            Self::Explicit => write!(f, "explicitly removed"),
        }
    }
}
