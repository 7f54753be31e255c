//! Fairway Core - Shared types for bay session management
//!
//! This crate provides the core domain types shared between
//! the daemon (fairwayd) and the bay agent (fairway-agent).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod bay;

// Re-exports for convenience
pub use bay::{BayId, BaySession, BaySnapshot, SessionStatus};
