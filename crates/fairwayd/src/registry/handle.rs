//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending
//! commands to the registry actor and subscribing to bay events. It is the
//! surface the acceptor, the per-connection routers, the sweeper, and the
//! presentation collaborator all share.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use fairway_core::{BayId, BaySnapshot};
use fairway_protocol::{AgentReport, BayCommand, Handshake};

use super::commands::{BayEvent, BayWriter, RegistryCommand, RegistryError};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<BayEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<BayEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Register a bay after a successful handshake.
    ///
    /// An existing entry with the same identity is superseded: its socket
    /// is closed and its router cancelled before the new entry appears.
    ///
    /// # Errors
    ///
    /// - `RegistryError::RegistryFull` if the registry is at capacity and
    ///   the identity is new
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(
        &self,
        handshake: Handshake,
        peer_addr: SocketAddr,
        writer: BayWriter,
        cancel: CancellationToken,
    ) -> Result<BaySnapshot, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                handshake,
                peer_addr,
                writer,
                cancel,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Send one command to one bay. This is the dispatch path the
    /// presentation layer uses.
    ///
    /// # Errors
    ///
    /// - `RegistryError::BayNotFound` if no bay has this identity
    /// - `RegistryError::ConnectionLost` if the write failed; the bay has
    ///   been evicted and a removal event published
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn send(&self, id: BayId, command: BayCommand) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Deliver {
                id,
                command,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Forward an inbound report from a connection's read loop.
    ///
    /// Fire-and-forget: a report races with shutdown or eviction by nature,
    /// so send errors are ignored.
    pub async fn report(&self, peer_addr: SocketAddr, report: AgentReport) {
        let _ = self
            .sender
            .send(RegistryCommand::Report { peer_addr, report })
            .await;
    }

    /// Notify the registry that a connection's read side terminated.
    ///
    /// Fire-and-forget for the same reason as [`report`](Self::report).
    pub async fn connection_closed(&self, peer_addr: SocketAddr) {
        let _ = self
            .sender
            .send(RegistryCommand::ConnectionClosed { peer_addr })
            .await;
    }

    /// Get the bay currently registered at a transport address.
    ///
    /// Returns `None` if nothing is registered there or if communication
    /// with the actor fails.
    pub async fn get(&self, peer_addr: SocketAddr) -> Option<BaySnapshot> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Get {
                peer_addr,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Get a snapshot of every registered bay.
    ///
    /// Returns an empty vector if no bays are registered or if
    /// communication with the actor fails.
    pub async fn list(&self) -> Vec<BaySnapshot> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::List { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Explicitly evict the bay at a transport address.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AddressNotFound` if nothing is registered there
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn remove(&self, peer_addr: SocketAddr) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Remove {
                peer_addr,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Trigger a liveness sweep.
    ///
    /// Fire-and-forget; issued by the sweeper task.
    pub async fn sweep(&self) {
        let _ = self.sender.send(RegistryCommand::Sweep).await;
    }

    /// Subscribe to bay events.
    ///
    /// Returns a broadcast receiver that will receive every event
    /// (additions, removals, extension requests, status changes) published
    /// by the registry actor.
    ///
    /// This is a synchronous operation - it doesn't communicate with the
    /// actor.
    pub fn subscribe(&self) -> broadcast::Receiver<BayEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    ///
    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        let handle = RegistryHandle::new(cmd_tx, event_tx);
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn test_handle_is_clone() {
        let (handle, _rx) = create_test_handle();
        let _cloned = handle.clone();
    }

    #[tokio::test]
    async fn test_send_dispatches_deliver_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Deliver {
                id,
                command,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(id, BayId::new("10.0.0.5"));
                assert_eq!(command, BayCommand::start(30));
                let _ = respond_to.send(Ok(()));
                return true;
            }
            false
        });

        let result = handle.send(BayId::new("10.0.0.5"), BayCommand::start(30)).await;
        assert!(result.is_ok());
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_send_channel_closed_error() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let result = handle.send(BayId::new("10.0.0.5"), BayCommand::End).await;
        assert!(matches!(result, Err(RegistryError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_get_returns_none_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let addr: SocketAddr = "10.0.0.5:50011".parse().unwrap();
        assert!(handle.get(addr).await.is_none());
    }

    #[tokio::test]
    async fn test_list_returns_empty_on_channel_close() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        assert!(handle.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_report_is_fire_and_forget() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            matches!(
                rx.recv().await,
                Some(RegistryCommand::Report {
                    report: AgentReport::End,
                    ..
                })
            )
        });

        let addr: SocketAddr = "10.0.0.5:50011".parse().unwrap();
        handle.report(addr, AgentReport::End).await;
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_report_ignores_closed_channel() {
        let (handle, rx) = create_test_handle();
        drop(rx);

        let addr: SocketAddr = "10.0.0.5:50011".parse().unwrap();
        // Must not panic or error
        handle.report(addr, AgentReport::Pong).await;
    }

    #[tokio::test]
    async fn test_sweep_dispatches_command() {
        let (handle, mut rx) = create_test_handle();

        let cmd_handler = tokio::spawn(async move {
            matches!(rx.recv().await, Some(RegistryCommand::Sweep))
        });

        handle.sweep().await;
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_subscribe_returns_receiver() {
        let (handle, _rx) = create_test_handle();
        let _subscriber = handle.subscribe();
    }

    #[tokio::test]
    async fn test_is_connected() {
        let (handle, rx) = create_test_handle();

        assert!(handle.is_connected());

        drop(rx);
        // Need to send to detect closure
        handle.sweep().await;

        assert!(!handle.is_connected());
    }
}
