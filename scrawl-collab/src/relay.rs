//! Broadcast relay server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌──► Client A (echo)
//! Client B ──┼──► SessionRegistry ────┼──► Client B
//! Client C ──┘    (verbatim fan-out)  └──► Client C
//! ```
//!
//! The relay is deliberately protocol-agnostic: inbound text frames are
//! forwarded byte-for-byte to every registered session, the sender
//! included. It never decodes envelopes, never inspects `roomId`, and holds
//! no state beyond the live session map — clients are the sole owners of
//! message semantics and history.
//!
//! Per-sender frame order is preserved: each connection has a single reader
//! loop and every session drains a FIFO outbound queue. No order is
//! promised across different senders.
//!
//! Reference: Kleppmann, Chapter 8 — Broadcast Protocols

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use uuid::Uuid;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to.
    pub bind_addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_sessions: usize,
    pub frames_relayed: u64,
    pub bytes_relayed: u64,
}

/// Relay errors.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound write handle of one session.
type SessionSender = mpsc::UnboundedSender<Message>;

/// Concurrency-safe map of live sessions.
///
/// Owned by one [`Relay`] instance and shared with its per-connection
/// tasks; the accept path, broadcast path, and close path all mutate it
/// concurrently.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionSender>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session and mint its id.
    pub async fn register(&self, sender: SessionSender) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, sender);
        log::info!("session {id} registered, active connections: {}", sessions.len());
        id
    }

    /// Deregister a session.
    ///
    /// Removing an unknown or already-removed id is a no-op: the
    /// read-failure path and the explicit-close path may race to remove the
    /// same session.
    pub async fn remove(&self, id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(&id).is_some();
        if removed {
            log::info!("session {id} removed, active connections: {}", sessions.len());
        }
        removed
    }

    /// Forward a text frame verbatim to every registered session, the
    /// sender included.
    ///
    /// Delivery failure to one recipient does not abort delivery to the
    /// rest; the failed recipient is treated as disconnected and removed.
    /// Returns the number of sessions the frame was handed to.
    pub async fn broadcast(&self, sender_id: Uuid, raw: &str) -> usize {
        let frame = Utf8Bytes::from(raw);

        // Snapshot under the read lock, deliver outside it, so slow or
        // racing accept/close paths never stall the fan-out.
        let targets: Vec<(Uuid, SessionSender)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in targets {
            if tx.send(Message::Text(frame.clone())).is_ok() {
                delivered += 1;
            } else {
                log::warn!("failed to deliver to session {id}, removing it");
                dead.push(id);
            }
        }
        for id in dead {
            self.remove(id).await;
        }

        log::debug!("broadcast frame from {sender_id} to {delivered} sessions");
        delivered
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// The broadcast relay.
pub struct Relay {
    config: RelayConfig,
    registry: Arc<SessionRegistry>,
    stats: Arc<RwLock<RelayStats>>,
}

impl Relay {
    /// Create a relay with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// The configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// The session registry backing this relay.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Relay statistics.
    pub async fn stats(&self) -> RelayStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_sessions = self.registry.session_count().await;
        stats
    }

    /// Start listening for WebSocket connections.
    ///
    /// Runs the accept loop forever; call from an async runtime. Each
    /// accepted connection is handled on its own task so one session's I/O
    /// never stalls another's.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");

            let registry = Arc::clone(&self.registry);
            let stats = Arc::clone(&self.stats);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats).await {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection from accept to close.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<SessionRegistry>,
        stats: Arc<RwLock<RelayStats>>,
    ) -> Result<(), WsError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let session_id = registry.register(out_tx.clone()).await;
        log::info!("client connected: {session_id} ({addr})");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
        }

        // Writer task: drain this session's outbound queue into the socket.
        // When the socket dies the queue receiver drops with the task, which
        // is what broadcast observes as a dead recipient.
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // Reader loop: one inbound frame at a time, forwarded verbatim.
        while let Some(incoming) = ws_rx.next().await {
            match incoming {
                Ok(Message::Text(raw)) => {
                    {
                        let mut s = stats.write().await;
                        s.frames_relayed += 1;
                        s.bytes_relayed += raw.len() as u64;
                    }
                    registry.broadcast(session_id, raw.as_str()).await;
                }
                Ok(Message::Ping(payload)) => {
                    let _ = out_tx.send(Message::Pong(payload));
                }
                Ok(Message::Close(_)) => {
                    log::info!("client closing: {session_id}");
                    break;
                }
                Ok(_) => {} // binary and pong frames are ignored
                Err(e) => {
                    log::warn!("websocket error from {session_id}: {e}");
                    break;
                }
            }
        }

        registry.remove(session_id).await;
        writer.abort();
        log::info!("client disconnected: {session_id}");
        Ok(())
    }
}
