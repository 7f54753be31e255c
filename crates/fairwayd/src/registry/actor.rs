//! Registry actor - owns all bay state and processes commands.
//!
//! The RegistryActor is the single owner of session state in the system.
//! It receives commands via an mpsc channel and publishes events via
//! broadcast. Crucially it also owns the write half of every registered
//! socket: command delivery and identity replacement are serialized through
//! this one task, so a superseded socket can never be written to after its
//! replacement.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fairway_core::{BayId, BaySession, BaySnapshot};
use fairway_protocol::{encode_line, AgentReport, BayCommand, Handshake};

use super::commands::{BayEvent, BayWriter, RegistryCommand, RegistryError, RemovalReason};

/// Default maximum number of bays the registry can hold.
pub const DEFAULT_MAX_BAYS: usize = 64;

/// Write timeout for outbound commands and probes.
///
/// A peer that cannot take a small JSON line within this window is as good
/// as gone; the write is failed and the entry evicted.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// One registered bay: domain state plus the transport resources the
/// registry holds on its behalf.
struct BayEntry {
    session: BaySession,

    /// Sole write handle for this bay's socket.
    writer: BayWriter,

    /// Cancelling this terminates the connection's read loop, which closes
    /// the socket and unblocks any pending read.
    cancel: CancellationToken,
}

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all bay state.
///
/// # Design: identity as primary key
///
/// `bays` is keyed by [`BayId`] (the agent-reported IP), which is what makes
/// reconnect dedup atomic: a second handshake from the same identity lands
/// on the same key and replaces the entry in one step. `addr_index` maps the
/// per-connection transport address back to the identity for the router and
/// for address-based lookups; it is rebuilt on every replacement and never
/// treated as identity itself.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Primary storage: identity → entry
    bays: HashMap<BayId, BayEntry>,

    /// Index: transport address → identity
    addr_index: HashMap<SocketAddr, BayId>,

    /// Event publisher for collaborator notifications
    event_publisher: broadcast::Sender<BayEvent>,

    /// Capacity limit for new identities
    max_bays: usize,
}

impl RegistryActor {
    /// Creates a new registry actor.
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<BayEvent>,
        max_bays: usize,
    ) -> Self {
        Self {
            receiver,
            bays: HashMap::new(),
            addr_index: HashMap::new(),
            event_publisher,
            max_bays,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!(max_bays = self.max_bays, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!(bays = self.bays.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                handshake,
                peer_addr,
                writer,
                cancel,
                respond_to,
            } => {
                let result = self.handle_register(handshake, peer_addr, writer, cancel).await;
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Deliver {
                id,
                command,
                respond_to,
            } => {
                let result = self.handle_deliver(id, command).await;
                let _ = respond_to.send(result);
            }
            RegistryCommand::Report { peer_addr, report } => {
                self.handle_report(peer_addr, report);
            }
            RegistryCommand::ConnectionClosed { peer_addr } => {
                self.handle_connection_closed(peer_addr).await;
            }
            RegistryCommand::Get {
                peer_addr,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_get(peer_addr));
            }
            RegistryCommand::List { respond_to } => {
                let _ = respond_to.send(self.handle_list());
            }
            RegistryCommand::Remove {
                peer_addr,
                respond_to,
            } => {
                let result = self.handle_remove(peer_addr).await;
                let _ = respond_to.send(result);
            }
            RegistryCommand::Sweep => {
                self.handle_sweep().await;
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Handles bay registration, superseding any entry with the same
    /// identity.
    async fn handle_register(
        &mut self,
        handshake: Handshake,
        peer_addr: SocketAddr,
        writer: BayWriter,
        cancel: CancellationToken,
    ) -> Result<BaySnapshot, RegistryError> {
        let id = handshake.identity();

        if let Some(old) = self.bays.remove(&id) {
            info!(
                bay = %id,
                old_addr = %old.session.peer_addr,
                new_addr = %peer_addr,
                "Superseding existing connection for identity"
            );
            self.addr_index.remove(&old.session.peer_addr);
            retire(old).await;
            self.publish(BayEvent::Removed {
                id: id.clone(),
                reason: RemovalReason::Superseded,
            });
        } else if self.bays.len() >= self.max_bays {
            warn!(
                bay = %id,
                current = self.bays.len(),
                max = self.max_bays,
                "Registry is full, rejecting registration"
            );
            // Tear the incoming connection down; nothing was registered.
            cancel.cancel();
            return Err(RegistryError::RegistryFull { max: self.max_bays });
        }

        let session = BaySession::new(id.clone(), handshake.name, peer_addr);
        let snapshot = session.snapshot();

        self.bays.insert(
            id.clone(),
            BayEntry {
                session,
                writer,
                cancel,
            },
        );
        self.addr_index.insert(peer_addr, id.clone());

        info!(
            bay = %id,
            addr = %peer_addr,
            total_bays = self.bays.len(),
            "Bay registered"
        );

        self.publish(BayEvent::Added {
            snapshot: snapshot.clone(),
        });

        Ok(snapshot)
    }

    /// Handles outbound command delivery to one bay.
    ///
    /// A successful `start`/`add`/`sub` optimistically transitions the bay
    /// to Active before any agent-side acknowledgment; `end` goes to Idle.
    /// A failed write evicts the entry.
    async fn handle_deliver(
        &mut self,
        id: BayId,
        command: BayCommand,
    ) -> Result<(), RegistryError> {
        let entry = match self.bays.get_mut(&id) {
            Some(entry) => entry,
            None => return Err(RegistryError::BayNotFound(id)),
        };

        let line = encode_line(&command).map_err(|e| RegistryError::Encode(e.to_string()))?;

        if let Err(e) = write_line(&mut entry.writer, &line).await {
            warn!(bay = %id, error = %e, "Command write failed, evicting bay");
            self.evict(&id, RemovalReason::ConnectionLost).await;
            return Err(RegistryError::ConnectionLost(id));
        }

        let before = entry.session.status;
        match &command {
            BayCommand::Start { minutes } => entry.session.apply_started(*minutes),
            BayCommand::Add { minutes } => entry.session.apply_added(*minutes),
            BayCommand::Sub { minutes } => entry.session.apply_subtracted(*minutes),
            BayCommand::End => entry.session.apply_ended(),
            BayCommand::Extend { approved, minutes } => {
                if *approved {
                    entry.session.apply_extension(*minutes);
                }
            }
            BayCommand::Lock | BayCommand::Ping => {}
        }

        debug!(bay = %id, command = ?command, "Command delivered");

        let status = entry.session.status;
        if status != before {
            self.publish(BayEvent::StatusChanged { id, status });
        }

        Ok(())
    }

    /// Handles an inbound report from a bay's read loop.
    fn handle_report(&mut self, peer_addr: SocketAddr, report: AgentReport) {
        let id = match self.addr_index.get(&peer_addr) {
            Some(id) => id.clone(),
            None => {
                debug!(addr = %peer_addr, "Report from unregistered address, ignoring");
                return;
            }
        };

        match report {
            AgentReport::ExtendRequest { minutes } => {
                info!(bay = %id, minutes, "Extension requested");
                // The registry takes no decision here: the admin answers
                // through a later `extend` command.
                self.publish(BayEvent::ExtensionRequested { id, minutes });
            }
            AgentReport::End => {
                info!(bay = %id, "Bay reported session end");
                if let Some(entry) = self.bays.get_mut(&id) {
                    entry.session.apply_ended();
                    let status = entry.session.status;
                    self.publish(BayEvent::StatusChanged { id, status });
                }
            }
            AgentReport::Pong => {
                debug!(bay = %id, "Probe answered");
            }
        }
    }

    /// Handles a read-side disconnect reported by a connection's router.
    ///
    /// The address may already be gone: the router of a superseded
    /// connection also exits and reports here, but its address was removed
    /// from the index during replacement. That makes this a no-op for stale
    /// addresses, so each address produces at most one removal.
    async fn handle_connection_closed(&mut self, peer_addr: SocketAddr) {
        let id = match self.addr_index.get(&peer_addr) {
            Some(id) => id.clone(),
            None => {
                debug!(addr = %peer_addr, "Closed connection was already deregistered");
                return;
            }
        };

        info!(bay = %id, addr = %peer_addr, "Connection closed");
        self.evict(&id, RemovalReason::ConnectionLost).await;
    }

    /// Handles a lookup by transport address.
    fn handle_get(&self, peer_addr: SocketAddr) -> Option<BaySnapshot> {
        self.addr_index
            .get(&peer_addr)
            .and_then(|id| self.bays.get(id))
            .map(|entry| entry.session.snapshot())
    }

    /// Handles a full snapshot listing.
    fn handle_list(&self) -> Vec<BaySnapshot> {
        self.bays
            .values()
            .map(|entry| entry.session.snapshot())
            .collect()
    }

    /// Handles explicit removal by transport address.
    async fn handle_remove(&mut self, peer_addr: SocketAddr) -> Result<(), RegistryError> {
        let id = match self.addr_index.get(&peer_addr) {
            Some(id) => id.clone(),
            None => return Err(RegistryError::AddressNotFound(peer_addr)),
        };

        self.evict(&id, RemovalReason::Explicit).await;
        Ok(())
    }

    /// Probes every registered socket, evicting entries whose probe fails.
    ///
    /// TCP does not surface a silently vanished peer without traffic; the
    /// probe is a real protocol line (`ping`) because a zero-length write
    /// never reaches the socket.
    async fn handle_sweep(&mut self) {
        if self.bays.is_empty() {
            return;
        }

        let probe = match encode_line(&BayCommand::Ping) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Could not encode probe");
                return;
            }
        };

        let ids: Vec<BayId> = self.bays.keys().cloned().collect();
        let mut dead = Vec::new();

        for id in ids {
            if let Some(entry) = self.bays.get_mut(&id) {
                if let Err(e) = write_line(&mut entry.writer, &probe).await {
                    debug!(bay = %id, error = %e, "Probe failed");
                    dead.push(id);
                }
            }
        }

        for id in dead {
            warn!(bay = %id, "Evicting bay after failed probe");
            self.evict(&id, RemovalReason::ProbeFailed).await;
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Removes a bay, closes its connection, and notifies subscribers.
    ///
    /// Publishes the Disconnected status before the removal so the
    /// collaborator never sees a silent drop.
    async fn evict(&mut self, id: &BayId, reason: RemovalReason) {
        let mut entry = match self.bays.remove(id) {
            Some(entry) => entry,
            None => return,
        };
        self.addr_index.remove(&entry.session.peer_addr);

        entry.session.mark_disconnected();
        self.publish(BayEvent::StatusChanged {
            id: id.clone(),
            status: entry.session.status,
        });

        retire(entry).await;

        info!(
            bay = %id,
            reason = %reason,
            remaining_bays = self.bays.len(),
            "Bay removed"
        );

        self.publish(BayEvent::Removed {
            id: id.clone(),
            reason,
        });
    }

    /// Publishes an event, ignoring the no-subscriber case.
    fn publish(&self, event: BayEvent) {
        let _ = self.event_publisher.send(event);
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of bays currently registered.
    #[cfg(test)]
    pub fn bay_count(&self) -> usize {
        self.bays.len()
    }
}

/// Releases a retired entry's transport resources: the read loop is
/// cancelled (unblocking its pending read) and the write half shut down.
async fn retire(mut entry: BayEntry) {
    entry.cancel.cancel();
    let _ = entry.writer.shutdown().await;
}

/// Writes one framed line with the registry write timeout.
async fn write_line(writer: &mut BayWriter, line: &str) -> std::io::Result<()> {
    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    })
    .await
    {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write timed out",
        )),
    }
}
