//! Protocol message types for daemon/agent communication.

use fairway_core::BayId;
use serde::{Deserialize, Serialize};

/// Identity handshake, the first line an agent sends after connecting.
///
/// No commands flow until this arrives. The shape is fixed: agents in the
/// field send exactly `{"name": ..., "ip": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Human-readable bay name (typically the machine hostname).
    pub name: String,

    /// Self-reported IP address, the stable identity across reconnects.
    pub ip: String,
}

impl Handshake {
    /// Creates a new handshake payload.
    pub fn new(name: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: ip.into(),
        }
    }

    /// Returns the stable identity for this handshake.
    ///
    /// The reported IP is the dedup key; a bay that reports no IP falls
    /// back to its name.
    #[must_use]
    pub fn identity(&self) -> BayId {
        if self.ip.is_empty() {
            BayId::new(&self.name)
        } else {
            BayId::new(&self.ip)
        }
    }
}

/// Commands sent by the daemon to a bay agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum BayCommand {
    /// Start a timed session of the given length.
    Start {
        /// Session length in minutes
        minutes: u32,
    },

    /// Add minutes to the running session.
    Add { minutes: u32 },

    /// Subtract minutes from the running session (clamped at zero).
    Sub { minutes: u32 },

    /// End the session immediately.
    End,

    /// Lock the bay's screen.
    Lock,

    /// Admin decision on a pending extension request.
    Extend {
        /// Whether the admin approved the request
        approved: bool,
        /// Requested minutes (applied only when approved)
        minutes: u32,
    },

    /// Liveness probe; agents answer with [`AgentReport::Pong`].
    Ping,
}

impl BayCommand {
    /// Creates a start command.
    pub fn start(minutes: u32) -> Self {
        Self::Start { minutes }
    }

    /// Creates an add-minutes command.
    pub fn add(minutes: u32) -> Self {
        Self::Add { minutes }
    }

    /// Creates a subtract-minutes command.
    pub fn sub(minutes: u32) -> Self {
        Self::Sub { minutes }
    }

    /// Creates an extension decision.
    pub fn extend(approved: bool, minutes: u32) -> Self {
        Self::Extend { approved, minutes }
    }
}

/// Reports sent by a bay agent to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AgentReport {
    /// The customer asked for more time; the admin decides.
    ExtendRequest {
        /// Requested minutes
        minutes: u32,
    },

    /// The agent's session ended (timer expired or ended locally).
    End,

    /// Reply to a liveness probe.
    Pong,
}

impl AgentReport {
    /// Creates an extension request.
    pub fn extend_request(minutes: u32) -> Self {
        Self::ExtendRequest { minutes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_wire_shape() {
        let hs = Handshake::new("Bay-1", "10.0.0.5");
        let json = serde_json::to_string(&hs).unwrap();
        assert_eq!(json, r#"{"name":"Bay-1","ip":"10.0.0.5"}"#);
    }

    #[test]
    fn test_handshake_identity_prefers_ip() {
        let hs = Handshake::new("Bay-1", "10.0.0.5");
        assert_eq!(hs.identity(), BayId::new("10.0.0.5"));
    }

    #[test]
    fn test_handshake_identity_falls_back_to_name() {
        let hs = Handshake::new("Bay-1", "");
        assert_eq!(hs.identity(), BayId::new("Bay-1"));
    }

    #[test]
    fn test_start_command_wire_shape() {
        let json = serde_json::to_string(&BayCommand::start(30)).unwrap();
        assert_eq!(json, r#"{"cmd":"start","minutes":30}"#);
    }

    #[test]
    fn test_end_command_wire_shape() {
        let json = serde_json::to_string(&BayCommand::End).unwrap();
        assert_eq!(json, r#"{"cmd":"end"}"#);
    }

    #[test]
    fn test_lock_command_wire_shape() {
        let json = serde_json::to_string(&BayCommand::Lock).unwrap();
        assert_eq!(json, r#"{"cmd":"lock"}"#);
    }

    #[test]
    fn test_extend_command_wire_shape() {
        let json = serde_json::to_string(&BayCommand::extend(false, 15)).unwrap();
        assert_eq!(json, r#"{"cmd":"extend","approved":false,"minutes":15}"#);
    }

    #[test]
    fn test_extend_request_wire_shape() {
        let json = serde_json::to_string(&AgentReport::extend_request(10)).unwrap();
        assert_eq!(json, r#"{"cmd":"extend_request","minutes":10}"#);
    }

    #[test]
    fn test_unknown_report_is_rejected() {
        let result: Result<AgentReport, _> =
            serde_json::from_str(r#"{"cmd":"reboot","minutes":5}"#);
        assert!(result.is_err());
    }
}
