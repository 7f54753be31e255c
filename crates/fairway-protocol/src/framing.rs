//! Newline-delimited JSON framing.
//!
//! One JSON object per line, both directions. TCP gives a byte stream, not
//! message boundaries; reading line-by-line is what keeps two commands from
//! merging into one read or a single command from splitting across two.
//! The daemon and the agent both frame through these helpers so the two
//! ends cannot drift.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum accepted line length (64 KiB).
///
/// A line past this is framing corruption, not a recoverable bad message.
pub const MAX_LINE_BYTES: usize = 65_536;

/// Errors produced by line framing.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The payload could not be serialized or deserialized.
    #[error("invalid message payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The line exceeds [`MAX_LINE_BYTES`].
    #[error("message too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },
}

/// Encodes a message as a single newline-terminated JSON line.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, FrameError> {
    let mut line = serde_json::to_string(msg)?;
    if line.len() > MAX_LINE_BYTES {
        return Err(FrameError::TooLarge {
            size: line.len(),
            max: MAX_LINE_BYTES,
        });
    }
    line.push('\n');
    Ok(line)
}

/// Decodes one received line into a message.
///
/// The trailing newline (and any surrounding whitespace) is tolerated so
/// callers can pass `read_line` output directly.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, FrameError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(FrameError::TooLarge {
            size: line.len(),
            max: MAX_LINE_BYTES,
        });
    }
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentReport, BayCommand, Handshake};

    fn round_trip<T>(msg: &T)
    where
        T: Serialize + DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let line = encode_line(msg).expect("encode");
        assert!(line.ends_with('\n'), "line must be newline-terminated");
        assert_eq!(
            line.matches('\n').count(),
            1,
            "payload must not contain embedded newlines"
        );
        let decoded: T = decode_line(&line).expect("decode");
        assert_eq!(&decoded, msg);
    }

    #[test]
    fn test_round_trip_every_command_kind() {
        round_trip(&BayCommand::start(30));
        round_trip(&BayCommand::add(15));
        round_trip(&BayCommand::sub(10));
        round_trip(&BayCommand::End);
        round_trip(&BayCommand::Lock);
        round_trip(&BayCommand::extend(true, 10));
        round_trip(&BayCommand::extend(false, 10));
        round_trip(&BayCommand::Ping);
    }

    #[test]
    fn test_round_trip_every_report_kind() {
        round_trip(&AgentReport::extend_request(10));
        round_trip(&AgentReport::End);
        round_trip(&AgentReport::Pong);
    }

    #[test]
    fn test_round_trip_handshake() {
        round_trip(&Handshake::new("Bay-1", "10.0.0.5"));
    }

    #[test]
    fn test_decode_tolerates_trailing_newline() {
        let cmd: BayCommand = decode_line("{\"cmd\":\"end\"}\n").expect("decode");
        assert_eq!(cmd, BayCommand::End);
    }

    #[test]
    fn test_decode_rejects_oversized_line() {
        let huge = format!("{{\"cmd\":\"start\",\"minutes\":{}}}", "9".repeat(MAX_LINE_BYTES));
        let result: Result<BayCommand, _> = decode_line(&huge);
        assert!(matches!(result, Err(FrameError::TooLarge { .. })));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result: Result<BayCommand, _> = decode_line("not json at all");
        assert!(matches!(result, Err(FrameError::Payload(_))));
    }
}
