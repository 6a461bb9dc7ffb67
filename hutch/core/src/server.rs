//! TCP server
//!
//! Accepts client connections, speaks the line-delimited JSON protocol, and
//! feeds everything into the animator's event channel:
//!
//! ```text
//!                       Server (accept loop)
//!                            │
//!            ┌───────────────┼───────────────┐
//!            │               │               │
//!       housekeeping     web relay       test client
//!       (session-1)     (session-2)     (session-3)
//!            │               │               │
//!            └───────────────┴───────────────┘
//!                            │
//!                        Animator
//! ```
//!
//! Each connection gets a reader/writer task pair folded into one `select!`
//! loop: inbound bytes become [`AnimatorEvent`]s, outbound [`ServerMessage`]s
//! arrive on the session's private channel and go out as CRLF lines. The
//! server never touches the global state itself.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Instrument};

use crate::animator::{Animator, AnimatorConfig, AnimatorEvent};
use crate::device::DeviceDriver;
use crate::protocol::{encode, parse_request, LineDecoder, ServerMessage};
use crate::session::{SessionHandle, SessionId};

/// Port the appliance daemon listens on by default.
pub const DEFAULT_PORT: u16 = 10543;

/// Connection state tracking (internal to the server, separate from the
/// animator's session registry).
struct ConnectionState {
    /// When the connection was established.
    connected_at: Instant,
    /// Handle to abort the connection task.
    abort_handle: tokio::task::AbortHandle,
}

/// Configuration for the TCP server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Interface to bind.
    pub bind_address: String,
    /// Port to listen on. `0` asks the OS for an ephemeral port.
    pub port: u16,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
    /// Per-session outbound channel capacity.
    pub session_channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            max_connections: 100,
            session_channel_capacity: 256,
        }
    }
}

/// The appliance's TCP front end.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    events: mpsc::Sender<AnimatorEvent>,
    server_config: ServerConfig,
    /// Active connection state (task handles).
    connection_states: Arc<DashMap<SessionId, ConnectionState>>,
}

impl Server {
    /// Bind the listener and spawn the animator.
    ///
    /// The animator applies the boot posture as soon as it starts, so the
    /// device shows signs of life before the first client connects.
    pub async fn bind(
        server_config: ServerConfig,
        animator_config: AnimatorConfig,
        device: Arc<dyn DeviceDriver>,
    ) -> Result<Self> {
        let listener = TcpListener::bind((server_config.bind_address.as_str(), server_config.port))
            .await
            .with_context(|| {
                format!(
                    "failed to bind {}:{}",
                    server_config.bind_address, server_config.port
                )
            })?;
        let local_addr = listener
            .local_addr()
            .context("failed to read bound address")?;
        info!(addr = %local_addr, device = device.name(), "listening for connections");

        let events = Animator::spawn(device, animator_config);

        Ok(Self {
            listener,
            local_addr,
            events,
            server_config,
            connection_states: Arc::new(DashMap::new()),
        })
    }

    /// Address the listener actually bound, useful when the port was `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }

    /// Run the accept loop until `shutdown` flips true.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) -> Result<()> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, stopping accept loop");
                break;
            }

            // Accept with timeout so the shutdown flag is polled regularly.
            let accepted =
                tokio::time::timeout(Duration::from_millis(100), self.listener.accept()).await;

            let (stream, peer) = match accepted {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
                Err(_) => continue,
            };

            if self.connection_states.len() >= self.server_config.max_connections {
                warn!(peer = %peer, "connection limit reached, rejecting new connection");
                drop(stream);
                continue;
            }

            let id = SessionId::next();
            let (session_tx, session_rx) =
                mpsc::channel::<ServerMessage>(self.server_config.session_channel_capacity);

            // Register before the handler runs so the greeting is already
            // queued when the writer starts draining.
            if self
                .events
                .send(AnimatorEvent::SessionOpened(SessionHandle::new(
                    id, session_tx, peer,
                )))
                .await
                .is_err()
            {
                error!("animator channel closed, refusing connection");
                break;
            }

            info!(
                session = %id,
                peer = %peer,
                active_connections = self.connection_states.len() + 1,
                "connection accepted"
            );

            let events = self.events.clone();
            let connection_states = Arc::clone(&self.connection_states);
            let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
            let task = tokio::spawn(
                async move {
                    // Hold the handler until the accept loop has recorded
                    // this connection; teardown then always finds its entry.
                    let _ = ready_rx.await;
                    Self::handle_connection(id, stream, events, session_rx, connection_states)
                        .await;
                }
                .instrument(tracing::info_span!("connection", session = %id)),
            );

            self.connection_states.insert(
                id,
                ConnectionState {
                    connected_at: Instant::now(),
                    abort_handle: task.abort_handle(),
                },
            );
            let _ = ready_tx.send(());
        }

        self.shutdown().await
    }

    /// Handle a single client connection.
    ///
    /// Inbound lines are decoded and forwarded to the animator; the animator
    /// never meets a raw socket. Outbound messages arrive on this session's
    /// private channel and are written as CRLF lines. Either side failing
    /// tears the connection down.
    async fn handle_connection(
        id: SessionId,
        stream: TcpStream,
        events: mpsc::Sender<AnimatorEvent>,
        mut session_rx: mpsc::Receiver<ServerMessage>,
        connection_states: Arc<DashMap<SessionId, ConnectionState>>,
    ) {
        debug!("connection handler started");

        let (mut read_half, mut write_half) = stream.into_split();
        let mut decoder = LineDecoder::new();
        let mut read_buf = vec![0u8; 8192];

        loop {
            tokio::select! {
                read_result = read_half.read(&mut read_buf) => {
                    match read_result {
                        Ok(0) => {
                            info!("client disconnected");
                            break;
                        }
                        Ok(n) => {
                            decoder.push(&read_buf[..n]);
                            let mut animator_gone = false;
                            while let Some(line) = decoder.next_line() {
                                let event = match parse_request(&line) {
                                    Ok(request) => AnimatorEvent::Request { from: id, request },
                                    Err(violation) => AnimatorEvent::Violation { from: id, violation },
                                };
                                if events.send(event).await.is_err() {
                                    error!("animator channel closed");
                                    animator_gone = true;
                                    break;
                                }
                            }
                            if animator_gone {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "read error");
                            break;
                        }
                    }
                }

                outbound = session_rx.recv() => {
                    match outbound {
                        Some(message) => {
                            match encode(&message) {
                                Ok(line) => {
                                    if let Err(e) = write_half.write_all(&line).await {
                                        warn!(error = %e, "write error");
                                        break;
                                    }
                                }
                                Err(e) => warn!(error = %e, "failed to encode message"),
                            }
                        }
                        None => {
                            // The animator dropped this session (stalled, or
                            // daemon shutdown).
                            debug!("session channel closed");
                            break;
                        }
                    }
                }
            }
        }

        let _ = events.send(AnimatorEvent::SessionClosed(id)).await;
        if let Some((_, state)) = connection_states.remove(&id) {
            debug!(
                uptime_secs = state.connected_at.elapsed().as_secs(),
                active_connections = connection_states.len(),
                "connection handler finished"
            );
        }
    }

    /// Graceful shutdown: abort the handlers, then stop the animator.
    async fn shutdown(&mut self) -> Result<()> {
        info!("initiating graceful shutdown");

        let ids: Vec<SessionId> = self.connection_states.iter().map(|r| *r.key()).collect();
        for id in ids {
            if let Some((_, state)) = self.connection_states.remove(&id) {
                debug!(session = %id, "aborting connection");
                state.abort_handle.abort();
            }
        }

        // Give handlers a moment to finish their teardown sends.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let _ = self.events.send(AnimatorEvent::Shutdown).await;

        info!("shutdown complete");
        Ok(())
    }
}
