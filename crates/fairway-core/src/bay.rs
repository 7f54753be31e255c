//! Bay session entities and value objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tracing::debug;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Stable identity of a bay computer.
///
/// This is the agent-reported IP address (or hostname when no address is
/// reported) from the handshake. It is the dedup key across reconnects:
/// a bay that drops its connection and dials back in under a new ephemeral
/// port carries the same `BayId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BayId(String);

impl BayId {
    /// Creates a new BayId from a string.
    ///
    /// No format validation: the agent reports its own address and we
    /// treat it as an opaque key.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BayId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BayId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for BayId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Session Status
// ============================================================================

/// Current operational status of a bay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No timed session is running; the bay is waiting for the admin.
    #[default]
    Idle,

    /// A timed session is running on the bay.
    Active,

    /// The bay's connection is gone; shown until the entry is pruned.
    Disconnected,
}

impl SessionStatus {
    /// Returns the display label for this status.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

// ============================================================================
// Bay Session (domain entity)
// ============================================================================

/// One logical bay, independent of the specific socket currently backing it.
///
/// Owned exclusively by the registry actor. The transport write half lives
/// next to this entity inside the registry, never inside it, so the domain
/// state stays plain data.
///
/// `remaining_seconds` is the server's last-known view of the countdown:
/// the authoritative copy runs agent-side, and this field exists for
/// display, not for timing decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaySession {
    /// Stable identity (reported IP or hostname).
    pub id: BayId,

    /// Human-readable name reported at handshake time.
    pub display_name: String,

    /// Current transport address. A lookup key for the lifetime of one
    /// connection; never stable across reconnects, never an identity.
    pub peer_addr: SocketAddr,

    /// Current session status.
    pub status: SessionStatus,

    /// Last-known countdown, in seconds.
    pub remaining_seconds: u32,

    /// When this connection registered.
    pub connected_at: DateTime<Utc>,

    /// When status or countdown last changed.
    pub last_change: DateTime<Utc>,
}

impl BaySession {
    /// Creates a fresh session for a newly registered connection.
    ///
    /// New sessions start Idle with no time on the clock, even when the
    /// identity was connected before: a reconnect supersedes the old entry
    /// wholesale and the agent keeps its own authoritative timer.
    pub fn new(id: BayId, display_name: impl Into<String>, peer_addr: SocketAddr) -> Self {
        let now = Utc::now();
        Self {
            id,
            display_name: display_name.into(),
            peer_addr,
            status: SessionStatus::Idle,
            remaining_seconds: 0,
            connected_at: now,
            last_change: now,
        }
    }

    /// Applies a session start: the countdown is set to the given minutes
    /// and the bay goes Active.
    pub fn apply_started(&mut self, minutes: u32) {
        self.remaining_seconds = minutes.saturating_mul(60);
        self.set_status(SessionStatus::Active);
    }

    /// Adds minutes to the countdown and marks the bay Active.
    pub fn apply_added(&mut self, minutes: u32) {
        self.remaining_seconds = self
            .remaining_seconds
            .saturating_add(minutes.saturating_mul(60));
        self.set_status(SessionStatus::Active);
    }

    /// Subtracts minutes from the countdown, clamping at zero, and marks
    /// the bay Active.
    pub fn apply_subtracted(&mut self, minutes: u32) {
        self.remaining_seconds = self
            .remaining_seconds
            .saturating_sub(minutes.saturating_mul(60));
        self.set_status(SessionStatus::Active);
    }

    /// Ends the session: countdown zeroed, bay back to Idle.
    pub fn apply_ended(&mut self) {
        self.remaining_seconds = 0;
        self.set_status(SessionStatus::Idle);
    }

    /// Applies an approved extension. Status is unchanged: an extension
    /// only makes sense on a running session and does not restart one.
    pub fn apply_extension(&mut self, minutes: u32) {
        self.remaining_seconds = self
            .remaining_seconds
            .saturating_add(minutes.saturating_mul(60));
        self.touch();
    }

    /// Marks the bay as disconnected.
    pub fn mark_disconnected(&mut self) {
        self.set_status(SessionStatus::Disconnected);
    }

    /// Returns a serializable snapshot of this session.
    #[must_use]
    pub fn snapshot(&self) -> BaySnapshot {
        BaySnapshot {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            peer_addr: self.peer_addr,
            status: self.status,
            remaining_seconds: self.remaining_seconds,
            connected_at: self.connected_at,
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            debug!(bay = %self.id, from = %self.status, to = %status, "Status transition");
        }
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.last_change = Utc::now();
    }
}

// ============================================================================
// Bay Snapshot (read model)
// ============================================================================

/// Read-only view of a bay session, carried in events and query replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaySnapshot {
    pub id: BayId,
    pub display_name: String,
    pub peer_addr: SocketAddr,
    pub status: SessionStatus,
    pub remaining_seconds: u32,
    pub connected_at: DateTime<Utc>,
}
