//! Local session clock.
//!
//! The agent holds the authoritative countdown for its bay: the daemon's
//! view is display-only. The clock is a pure state machine driven by
//! server commands plus a one-second tick from the client loop.

/// Authoritative countdown state for one bay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionClock {
    remaining_seconds: u32,
    active: bool,
}

impl SessionClock {
    /// Creates an inactive clock with no time on it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a session of the given length.
    pub fn start(&mut self, minutes: u32) {
        self.remaining_seconds = minutes.saturating_mul(60);
        self.active = true;
    }

    /// Adds minutes to the countdown.
    pub fn add(&mut self, minutes: u32) {
        self.remaining_seconds = self
            .remaining_seconds
            .saturating_add(minutes.saturating_mul(60));
    }

    /// Subtracts minutes from the countdown, clamping at zero.
    ///
    /// A clamp to zero does not end the session by itself; the next tick
    /// reports the expiry.
    pub fn sub(&mut self, minutes: u32) {
        self.remaining_seconds = self
            .remaining_seconds
            .saturating_sub(minutes.saturating_mul(60));
    }

    /// Applies an approved extension.
    pub fn extend(&mut self, minutes: u32) {
        self.add(minutes);
    }

    /// Ends the session immediately.
    pub fn end(&mut self) {
        self.remaining_seconds = 0;
        self.active = false;
    }

    /// Advances the clock by one second.
    ///
    /// Returns `true` exactly once, on the tick where the running countdown
    /// reaches zero.
    pub fn tick(&mut self) -> bool {
        if !self.active {
            return false;
        }

        self.remaining_seconds = self.remaining_seconds.saturating_sub(1);

        if self.remaining_seconds == 0 {
            self.active = false;
            true
        } else {
            false
        }
    }

    /// Seconds left on the clock.
    #[must_use]
    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    /// Whether a session is currently running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }
}
