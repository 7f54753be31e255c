//! Bay session registry using the actor pattern.
//!
//! The registry is the single source of truth for which logical bay owns
//! which live connection. It receives commands via a tokio mpsc channel and
//! publishes events via broadcast.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐      ┌─────────────────┐      ┌───────────────────┐
//! │   Acceptor   │─────▶│  RegistryActor  │─────▶│ Broadcast Channel │
//! │  + Routers   │      │ (sessions +     │      │   (BayEvent)      │
//! │  + Sweeper   │      │  write halves)  │      └───────────────────┘
//! └──────────────┘      └─────────────────┘                │
//!       RegistryCommand (mpsc)                   presentation layer
//! ```
//!
//! Because the actor owns every socket's write half, command dispatch and
//! identity replacement cannot interleave: a superseded socket is closed
//! before any later command could reach it.

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, DEFAULT_MAX_BAYS};
pub use commands::{BayEvent, BayWriter, RegistryCommand, RegistryError, RemovalReason};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Returns a RegistryHandle for client use
///
/// The liveness sweeper is spawned separately; see
/// [`crate::sweeper::spawn_sweeper_task`].
pub fn spawn_registry(max_bays: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), max_bays);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
