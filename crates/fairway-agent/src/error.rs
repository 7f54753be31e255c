//! Error types for the bay agent.

use std::io;
use thiserror::Error;

/// Agent errors.
///
/// Transport failures end the current connection and send the client back
/// into its reconnect loop; protocol errors on a single line are logged
/// and skipped by the caller.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Failed to connect to the daemon.
    #[error("Failed to connect to server: {0}")]
    Connect(String),

    /// A message could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error passthrough.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Convenience Result type alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
