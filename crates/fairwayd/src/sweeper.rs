//! Liveness sweeper for the Fairway daemon.
//!
//! TCP does not reliably surface a peer's abrupt disappearance without a
//! read or write attempt: a bay whose power cord is pulled leaves its
//! registry entry looking healthy forever. The sweeper is the polling
//! backstop: on a fixed interval it asks the registry to probe every
//! registered socket with a `ping` line, and the registry evicts any entry
//! whose probe fails. The interval bounds the worst-case staleness of the
//! connected-bays view.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`

use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::RegistryHandle;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Spawns the liveness sweeper task.
///
/// The task issues fire-and-forget sweep commands to the registry on each
/// tick and shuts down cooperatively via the cancellation token (or when
/// the registry actor is gone).
///
/// # Arguments
///
/// * `registry` - Handle to the bay registry
/// * `period` - Time between sweeps
/// * `cancel_token` - Token for graceful shutdown
///
/// # Returns
///
/// A join handle for the spawned task.
pub fn spawn_sweeper_task(
    registry: RegistryHandle,
    period: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);

        info!(period_secs = period.as_secs(), "Liveness sweeper started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Liveness sweeper shutting down");
                    break;
                }

                _ = tick.tick() => {
                    if !registry.is_connected() {
                        debug!("Sweeper stopping: registry channel closed");
                        break;
                    }
                    registry.sweep().await;
                }
            }
        }

        debug!("Liveness sweeper task completed");
    })
}
