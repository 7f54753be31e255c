//! Daemon connection client for the bay agent.
//!
//! This module provides the `AgentClient` which handles:
//! - Connection to the daemon over TCP, with automatic reconnection and
//!   exponential backoff
//! - The identity handshake
//! - The command loop: server commands drive the local session clock and
//!   the screen locker, local commands from the embedding UI become
//!   reports to the daemon
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fairway_protocol::{decode_line, encode_line, AgentReport, BayCommand, Handshake};

use crate::error::{AgentError, Result};
use crate::lock::ScreenLocker;
use crate::session::SessionClock;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the agent client.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Daemon address, `host:port`.
    pub server_addr: String,

    /// Name reported in the handshake (typically the machine hostname).
    pub bay_name: String,

    /// IP to report as identity. When unset, the connection's local
    /// address is reported.
    pub report_ip: Option<String>,

    /// Initial delay before first retry after connection failure.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff.
    pub retry_multiplier: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9999".to_string(),
            bay_name: "bay".to_string(),
            report_ip: None,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
        }
    }
}

// ============================================================================
// Events & Commands
// ============================================================================

/// Events the client raises for the embedding UI (overlay, kiosk shell).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Connected and identified to the daemon.
    Connected,

    /// Connection lost; the client is retrying in the background.
    Disconnected,

    /// The admin started a session.
    SessionStarted { minutes: u32 },

    /// The countdown was adjusted (add/sub).
    TimeAdjusted { remaining_seconds: u32 },

    /// The session ended (admin command or local report).
    SessionEnded,

    /// The admin answered an extension request.
    ExtensionDecided { approved: bool, minutes: u32 },

    /// The countdown ran out.
    SessionExpired,
}

/// Commands the embedding UI sends to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    /// Ask the admin for more time.
    RequestExtension { minutes: u32 },

    /// Report the session ended locally.
    ReportEnd,
}

// ============================================================================
// Agent Client
// ============================================================================

/// Client for communicating with the Fairway daemon.
///
/// # Connection Lifecycle
///
/// 1. Connect to the daemon with exponential backoff
/// 2. Send the identity handshake as the first line
/// 3. Loop: apply server commands, tick the session clock once a second,
///    forward UI commands as reports
/// 4. On disconnect, notify the UI and go back to 1
pub struct AgentClient {
    /// Configuration for connection behavior.
    config: AgentConfig,

    /// The authoritative session countdown. Survives reconnects.
    clock: Mutex<SessionClock>,

    /// Screen lock implementation.
    locker: Box<dyn ScreenLocker>,

    /// Channel to send events to the UI.
    event_tx: mpsc::UnboundedSender<AgentEvent>,

    /// Channel to receive commands from the UI.
    command_rx: Mutex<mpsc::UnboundedReceiver<AgentCommand>>,

    /// Cancellation token for graceful shutdown.
    cancel_token: CancellationToken,
}

impl AgentClient {
    /// Creates a new agent client.
    #[must_use]
    pub fn new(
        config: AgentConfig,
        locker: Box<dyn ScreenLocker>,
        event_tx: mpsc::UnboundedSender<AgentEvent>,
        command_rx: mpsc::UnboundedReceiver<AgentCommand>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            clock: Mutex::new(SessionClock::new()),
            locker,
            event_tx,
            command_rx: Mutex::new(command_rx),
            cancel_token,
        }
    }

    /// Main loop that maintains the connection to the daemon.
    ///
    /// Runs until the cancellation token is triggered, reconnecting with
    /// exponential backoff whenever the connection drops.
    pub async fn run(&self) {
        info!(server = %self.config.server_addr, "Agent client starting");

        loop {
            if self.cancel_token.is_cancelled() {
                info!("Agent client shutting down (cancelled)");
                return;
            }

            match self.connect_with_retry().await {
                Ok(stream) => {
                    info!("Connected to daemon");
                    let _ = self.event_tx.send(AgentEvent::Connected);

                    if let Err(e) = self.handle_connection(stream).await {
                        warn!(error = %e, "Connection ended with error");
                    }

                    let _ = self.event_tx.send(AgentEvent::Disconnected);
                }
                Err(e) => {
                    if !self.cancel_token.is_cancelled() {
                        warn!(error = %e, "Failed to connect to daemon");
                    }
                }
            }

            if self.cancel_token.is_cancelled() {
                info!("Agent client shutting down (cancelled)");
                return;
            }
        }
    }

    /// Attempts to connect to the daemon with exponential backoff.
    ///
    /// Retries indefinitely until successful or cancelled.
    async fn connect_with_retry(&self) -> Result<TcpStream> {
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            debug!(attempt, server = %self.config.server_addr, "Attempting to connect");

            match TcpStream::connect(&self.config.server_addr).await {
                Ok(stream) => {
                    debug!(attempt, "Connection successful");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Connection attempt failed");
                }
            }

            tokio::select! {
                _ = sleep(delay) => {
                    let next_delay_ms =
                        (delay.as_millis() as f64 * self.config.retry_multiplier) as u64;
                    delay = Duration::from_millis(next_delay_ms).min(self.config.retry_max_delay);
                }
                _ = self.cancel_token.cancelled() => {
                    info!("Connection retry cancelled");
                    return Err(AgentError::Connect("cancelled".to_string()));
                }
            }
        }
    }

    /// Handles an established connection: handshake then the command loop.
    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let local_ip = stream
            .local_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        // Identify first; no commands flow until the daemon knows who we are.
        let ip = self.config.report_ip.clone().unwrap_or(local_ip);
        let handshake = Handshake::new(&self.config.bay_name, ip);
        send_line(&mut writer, &handshake).await?;
        debug!(name = %handshake.name, ip = %handshake.ip, "Handshake sent");

        let mut tick = interval(Duration::from_secs(1));

        // The buffer is NOT cleared at the top of the loop: read_line is not
        // cancellation-safe, and a tick firing mid-read would otherwise lose
        // the partial line. Cleared only after a complete line is handled.
        let mut line = String::new();

        loop {
            let mut command_rx = self.command_rx.lock().await;

            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Command loop cancelled");
                    return Ok(());
                }

                _ = tick.tick() => {
                    drop(command_rx);
                    self.handle_tick(&mut writer).await?;
                }

                command = command_rx.recv() => {
                    drop(command_rx);
                    match command {
                        Some(command) => self.handle_ui_command(command, &mut writer).await?,
                        None => {
                            info!("UI command channel closed");
                            return Ok(());
                        }
                    }
                }

                read = reader.read_line(&mut line) => {
                    drop(command_rx);
                    match read {
                        Ok(0) => {
                            info!("Daemon closed connection");
                            return Ok(());
                        }
                        Ok(_) => {
                            let result = self.handle_server_command(&line, &mut writer).await;
                            match result {
                                Ok(()) => {}
                                Err(AgentError::Protocol(e)) => {
                                    // One bad line must not cost the connection.
                                    warn!(error = %e, line = %line.trim(), "Skipping malformed command");
                                }
                                Err(e) => return Err(e),
                            }
                            line.clear();
                        }
                        Err(e) => return Err(AgentError::Io(e)),
                    }
                }
            }
        }
    }

    /// Advances the session clock one second, reporting expiry.
    async fn handle_tick(&self, writer: &mut OwnedWriteHalf) -> Result<()> {
        let expired = {
            let mut clock = self.clock.lock().await;
            clock.tick()
        };

        if expired {
            info!("Session expired");
            let _ = self.event_tx.send(AgentEvent::SessionExpired);
            send_line(writer, &AgentReport::End).await?;

            if let Err(e) = self.locker.lock_screen() {
                warn!(error = %e, "Failed to lock screen on expiry");
            }
        }

        Ok(())
    }

    /// Forwards a UI command to the daemon.
    async fn handle_ui_command(
        &self,
        command: AgentCommand,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        match command {
            AgentCommand::RequestExtension { minutes } => {
                info!(minutes, "Requesting extension");
                send_line(writer, &AgentReport::extend_request(minutes)).await
            }
            AgentCommand::ReportEnd => {
                info!("Reporting session end");
                {
                    let mut clock = self.clock.lock().await;
                    clock.end();
                }
                let _ = self.event_tx.send(AgentEvent::SessionEnded);
                send_line(writer, &AgentReport::End).await
            }
        }
    }

    /// Applies one server command line.
    async fn handle_server_command(
        &self,
        line: &str,
        writer: &mut OwnedWriteHalf,
    ) -> Result<()> {
        let command: BayCommand =
            decode_line(line).map_err(|e| AgentError::Protocol(e.to_string()))?;

        debug!(command = ?command, "Command received");

        match command {
            BayCommand::Start { minutes } => {
                let mut clock = self.clock.lock().await;
                clock.start(minutes);
                drop(clock);
                let _ = self.event_tx.send(AgentEvent::SessionStarted { minutes });
            }
            BayCommand::Add { minutes } => {
                let remaining = {
                    let mut clock = self.clock.lock().await;
                    clock.add(minutes);
                    clock.remaining_seconds()
                };
                let _ = self.event_tx.send(AgentEvent::TimeAdjusted {
                    remaining_seconds: remaining,
                });
            }
            BayCommand::Sub { minutes } => {
                let remaining = {
                    let mut clock = self.clock.lock().await;
                    clock.sub(minutes);
                    clock.remaining_seconds()
                };
                let _ = self.event_tx.send(AgentEvent::TimeAdjusted {
                    remaining_seconds: remaining,
                });
            }
            BayCommand::End => {
                let mut clock = self.clock.lock().await;
                clock.end();
                drop(clock);
                let _ = self.event_tx.send(AgentEvent::SessionEnded);
            }
            BayCommand::Lock => {
                if let Err(e) = self.locker.lock_screen() {
                    warn!(error = %e, "Failed to lock screen");
                }
            }
            BayCommand::Extend { approved, minutes } => {
                if approved {
                    let mut clock = self.clock.lock().await;
                    clock.extend(minutes);
                }
                let _ = self
                    .event_tx
                    .send(AgentEvent::ExtensionDecided { approved, minutes });
            }
            BayCommand::Ping => {
                send_line(writer, &AgentReport::Pong).await?;
            }
        }

        Ok(())
    }

    /// Seconds left on the local clock.
    pub async fn remaining_seconds(&self) -> u32 {
        self.clock.lock().await.remaining_seconds()
    }
}

/// Sends one framed line to the daemon.
async fn send_line<T: Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
    let line = encode_line(msg).map_err(|e| AgentError::Protocol(e.to_string()))?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::NoopLocker;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    /// Locker that counts invocations.
    struct CountingLocker(Arc<AtomicUsize>);

    impl ScreenLocker for CountingLocker {
        fn lock_screen(&self) -> std::io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        server: BufReader<TcpStream>,
        events: mpsc::UnboundedReceiver<AgentEvent>,
        commands: mpsc::UnboundedSender<AgentCommand>,
        cancel: CancellationToken,
    }

    /// Starts a client against a one-connection fake daemon and completes
    /// the handshake.
    async fn start_client(locker: Box<dyn ScreenLocker>) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = AgentConfig {
            server_addr: addr.to_string(),
            bay_name: "Bay-1".to_string(),
            report_ip: Some("10.0.0.5".to_string()),
            retry_initial_delay: Duration::from_millis(10),
            ..Default::default()
        };

        let (event_tx, events) = mpsc::unbounded_channel();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let client = AgentClient::new(config, locker, event_tx, command_rx, cancel.clone());
        tokio::spawn(async move { client.run().await });

        let (stream, _) = listener.accept().await.unwrap();
        let mut server = BufReader::new(stream);

        let mut line = String::new();
        timeout(Duration::from_secs(2), server.read_line(&mut line))
            .await
            .expect("handshake should arrive")
            .expect("read");
        assert_eq!(line, "{\"name\":\"Bay-1\",\"ip\":\"10.0.0.5\"}\n");

        Harness {
            server,
            events,
            commands,
            cancel,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<AgentEvent>) -> AgentEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event should arrive")
            .expect("event channel open")
    }

    #[tokio::test]
    async fn test_handshake_and_connected_event() {
        let mut harness = start_client(Box::new(NoopLocker)).await;
        assert_eq!(next_event(&mut harness.events).await, AgentEvent::Connected);
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn test_start_command_raises_event() {
        let mut harness = start_client(Box::new(NoopLocker)).await;
        assert_eq!(next_event(&mut harness.events).await, AgentEvent::Connected);

        let server = harness.server.get_mut();
        server
            .write_all(b"{\"cmd\":\"start\",\"minutes\":30}\n")
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut harness.events).await,
            AgentEvent::SessionStarted { minutes: 30 }
        );
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn test_ping_is_answered_with_pong() {
        let mut harness = start_client(Box::new(NoopLocker)).await;
        assert_eq!(next_event(&mut harness.events).await, AgentEvent::Connected);

        harness
            .server
            .get_mut()
            .write_all(b"{\"cmd\":\"ping\"}\n")
            .await
            .unwrap();

        let mut line = String::new();
        timeout(Duration::from_secs(2), harness.server.read_line(&mut line))
            .await
            .expect("pong should arrive")
            .expect("read");
        assert_eq!(line, "{\"cmd\":\"pong\"}\n");
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn test_lock_command_invokes_locker() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut harness = start_client(Box::new(CountingLocker(Arc::clone(&count)))).await;
        assert_eq!(next_event(&mut harness.events).await, AgentEvent::Connected);

        harness
            .server
            .get_mut()
            .write_all(b"{\"cmd\":\"lock\"}\n")
            .await
            .unwrap();

        for _ in 0..100 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn test_denied_extension_leaves_clock_alone() {
        let mut harness = start_client(Box::new(NoopLocker)).await;
        assert_eq!(next_event(&mut harness.events).await, AgentEvent::Connected);

        let server = harness.server.get_mut();
        server
            .write_all(b"{\"cmd\":\"start\",\"minutes\":30}\n")
            .await
            .unwrap();
        server
            .write_all(b"{\"cmd\":\"extend\",\"approved\":false,\"minutes\":15}\n")
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut harness.events).await,
            AgentEvent::SessionStarted { minutes: 30 }
        );
        assert_eq!(
            next_event(&mut harness.events).await,
            AgentEvent::ExtensionDecided {
                approved: false,
                minutes: 15
            }
        );
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn test_extension_request_reaches_server() {
        let mut harness = start_client(Box::new(NoopLocker)).await;
        assert_eq!(next_event(&mut harness.events).await, AgentEvent::Connected);

        harness
            .commands
            .send(AgentCommand::RequestExtension { minutes: 10 })
            .unwrap();

        let mut line = String::new();
        timeout(Duration::from_secs(2), harness.server.read_line(&mut line))
            .await
            .expect("request should arrive")
            .expect("read");
        assert_eq!(line, "{\"cmd\":\"extend_request\",\"minutes\":10}\n");
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn test_expiry_reports_end_and_locks() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut harness = start_client(Box::new(CountingLocker(Arc::clone(&count)))).await;
        assert_eq!(next_event(&mut harness.events).await, AgentEvent::Connected);

        // A zero-minute session expires on the next clock tick.
        harness
            .server
            .get_mut()
            .write_all(b"{\"cmd\":\"start\",\"minutes\":0}\n")
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut harness.events).await,
            AgentEvent::SessionStarted { minutes: 0 }
        );

        assert_eq!(
            timeout(Duration::from_secs(3), harness.events.recv())
                .await
                .expect("expiry should arrive within a tick")
                .expect("event channel open"),
            AgentEvent::SessionExpired
        );

        let mut line = String::new();
        timeout(Duration::from_secs(2), harness.server.read_line(&mut line))
            .await
            .expect("end report should arrive")
            .expect("read");
        assert_eq!(line, "{\"cmd\":\"end\"}\n");
        assert_eq!(count.load(Ordering::SeqCst), 1, "expiry locks the screen");
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn test_malformed_command_is_skipped() {
        let mut harness = start_client(Box::new(NoopLocker)).await;
        assert_eq!(next_event(&mut harness.events).await, AgentEvent::Connected);

        let server = harness.server.get_mut();
        server.write_all(b"{garbage\n").await.unwrap();
        server
            .write_all(b"{\"cmd\":\"start\",\"minutes\":5}\n")
            .await
            .unwrap();

        // The bad line is skipped, the good one still lands.
        assert_eq!(
            next_event(&mut harness.events).await,
            AgentEvent::SessionStarted { minutes: 5 }
        );
        harness.cancel.cancel();
    }
}
