//! Fairway Protocol - Wire protocol for daemon/agent communication
//!
//! This crate provides the message types and line framing for the TCP
//! channel between bay agents and the fairwayd daemon.

pub mod framing;
pub mod message;

pub use framing::{decode_line, encode_line, FrameError, MAX_LINE_BYTES};
pub use message::{AgentReport, BayCommand, Handshake};
