//! WebSocket client session with automatic reconnection.
//!
//! The connection lifecycle is an explicit state machine:
//! ```text
//!              connect()                  open ok
//! Disconnected ──────────► Connecting ─────────────► Connected
//!      ▲                        ▲                        │
//!      │ disconnect()           │ retry fires            │ close / error
//!      │ (suppresses retry)     │ (fixed 3 s delay)      ▼
//!      └────────────────── Reconnecting ◄─────────── Disconnected
//! ```
//!
//! All transition logic lives in the pure [`SessionFsm`]; the async
//! [`BoardClient`] only executes the actions the machine returns. This
//! keeps the reconnect behavior deterministic and testable without a live
//! network.
//!
//! Inbound frames are decoded defensively: a malformed frame is logged and
//! dropped, never escalated to a connection failure. Decoded strokes and
//! chat entries land in two [`EphemeralStore`]s swept by a single 1 s tick.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{now_ms, Envelope, Payload, Point, DEFAULT_ROOM};
use crate::store::{
    ChatEntry, EphemeralStore, Stroke, CHAT_LIFETIME_MS, EVICT_INTERVAL_MS, STROKE_LIFETIME_MS,
};

/// Client connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Inputs to the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmInput {
    /// `connect()` was called.
    ConnectRequested,
    /// `disconnect()` was called.
    DisconnectRequested,
    /// The underlying transport finished opening.
    TransportOpened,
    /// The transport closed or errored (including a failed open).
    TransportLost,
    /// A reconnect timer was armed.
    RetryScheduled,
    /// The armed reconnect timer fired.
    RetryFired,
}

/// Side effects the driver must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmAction {
    None,
    /// Open the underlying transport (cancelling any pending retry).
    OpenTransport,
    /// Close the transport and cancel any pending retry.
    CloseTransport,
    /// Arm a single reconnect timer.
    ScheduleRetry,
    /// Cancel any pending retry timer.
    CancelRetry,
}

/// Connection state machine.
///
/// Holds the current state plus the manual-disconnect flag; [`apply`]
/// is the single transition function driving every state change.
///
/// [`apply`]: SessionFsm::apply
#[derive(Debug, Clone)]
pub struct SessionFsm {
    state: ConnectionState,
    manual_disconnect: bool,
}

impl Default for SessionFsm {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFsm {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            manual_disconnect: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether auto-reconnect is currently suppressed.
    pub fn manually_disconnected(&self) -> bool {
        self.manual_disconnect
    }

    /// Apply one input, returning the action the driver must take.
    pub fn apply(&mut self, input: FsmInput) -> FsmAction {
        use ConnectionState::*;

        match input {
            FsmInput::ConnectRequested => match self.state {
                // connect() is idempotent while a connection is active or
                // being established.
                Connecting | Connected => FsmAction::None,
                Disconnected | Reconnecting => {
                    self.manual_disconnect = false;
                    self.state = Connecting;
                    FsmAction::OpenTransport
                }
            },

            FsmInput::DisconnectRequested => {
                self.manual_disconnect = true;
                self.state = Disconnected;
                FsmAction::CloseTransport
            }

            FsmInput::TransportOpened => {
                if self.state == Connecting {
                    self.state = Connected;
                    FsmAction::CancelRetry
                } else {
                    // A stale open completed after disconnect(); tear it
                    // back down.
                    FsmAction::CloseTransport
                }
            }

            FsmInput::TransportLost => match self.state {
                Connecting | Connected => {
                    self.state = Disconnected;
                    if self.manual_disconnect {
                        FsmAction::None
                    } else {
                        FsmAction::ScheduleRetry
                    }
                }
                // Duplicate loss reports (the reader and a failed open may
                // both observe the same failure) must not arm a second
                // retry.
                Disconnected | Reconnecting => FsmAction::None,
            },

            FsmInput::RetryScheduled => {
                if self.manual_disconnect {
                    FsmAction::None
                } else {
                    self.state = Reconnecting;
                    FsmAction::None
                }
            }

            FsmInput::RetryFired => {
                if self.manual_disconnect || self.state != Reconnecting {
                    FsmAction::None
                } else {
                    self.state = Connecting;
                    FsmAction::OpenTransport
                }
            }
        }
    }
}

/// Events emitted by the client for the surrounding UI.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A stroke entered the local store (drawn locally or received).
    StrokeAdded(Stroke),
    /// A chat entry entered the local store.
    ChatAdded(ChatEntry),
    /// The periodic sweep removed expired items; a redraw is warranted.
    Expired { strokes: bool, chat: bool },
}

/// Transport-level failures surfaced to callers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client is not connected; the frame was not sent.
    #[error("not connected")]
    NotConnected,
    /// The outbound queue is gone; the connection is tearing down.
    #[error("write failed")]
    WriteFailed,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:8080`.
    pub server_url: String,
    /// Room identifier stamped on outgoing envelopes.
    pub room: String,
    /// Fixed delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Maximum stroke age before eviction.
    pub stroke_lifetime: Duration,
    /// Maximum chat entry age before eviction.
    pub chat_lifetime: Duration,
    /// Sweep period for both stores.
    pub evict_interval: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            room: DEFAULT_ROOM.to_string(),
            reconnect_delay: Duration::from_secs(3),
            stroke_lifetime: Duration::from_millis(STROKE_LIFETIME_MS),
            chat_lifetime: Duration::from_millis(CHAT_LIFETIME_MS),
            evict_interval: Duration::from_millis(EVICT_INTERVAL_MS),
        }
    }
}

/// State shared between the client handle and its background tasks.
struct ClientShared {
    config: ClientConfig,
    fsm: Mutex<SessionFsm>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    retry: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    strokes: Mutex<EphemeralStore<Stroke>>,
    chat: Mutex<EphemeralStore<ChatEntry>>,
    event_tx: mpsc::UnboundedSender<BoardEvent>,
    /// Transport events and timer firings feed back into the state machine
    /// through this channel, serialized by the control loop.
    input_tx: mpsc::UnboundedSender<FsmInput>,
}

/// The whiteboard/chat client.
///
/// Owns one logical connection to the relay, the two ephemeral stores, and
/// the eviction tick. At most one transport and one pending reconnect timer
/// exist at a time; a new connect cancels any pending retry.
pub struct BoardClient {
    shared: Arc<ClientShared>,
    event_rx: Option<mpsc::UnboundedReceiver<BoardEvent>>,
    control_task: Option<JoinHandle<()>>,
    evict_task: Option<JoinHandle<()>>,
}

impl BoardClient {
    /// Create a new client. No connection is attempted until [`connect`].
    ///
    /// [`connect`]: BoardClient::connect
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(ClientShared {
            config,
            fsm: Mutex::new(SessionFsm::new()),
            outgoing: Mutex::new(None),
            retry: Mutex::new(None),
            reader: Mutex::new(None),
            strokes: Mutex::new(EphemeralStore::new()),
            chat: Mutex::new(EphemeralStore::new()),
            event_tx,
            input_tx,
        });

        let control_task = tokio::spawn(Self::control_loop(Arc::clone(&shared), input_rx));
        let evict_task = tokio::spawn(Self::evict_loop(Arc::clone(&shared)));

        Self {
            shared,
            event_rx: Some(event_rx),
            control_task: Some(control_task),
            evict_task: Some(evict_task),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::UnboundedReceiver<BoardEvent>> {
        self.event_rx.take()
    }

    /// Connect to the relay. No-op while already connecting or connected.
    pub async fn connect(&self) {
        Self::step(&self.shared, FsmInput::ConnectRequested).await;
    }

    /// Disconnect explicitly, suppressing automatic reconnection until the
    /// next [`connect`].
    ///
    /// [`connect`]: BoardClient::connect
    pub async fn disconnect(&self) {
        Self::step(&self.shared, FsmInput::DisconnectRequested).await;
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.shared.fsm.lock().await.state()
    }

    /// Whether the client is currently connected.
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Snapshot of the live strokes, in insertion order.
    pub async fn strokes(&self) -> Vec<Stroke> {
        self.shared.strokes.lock().await.snapshot().to_vec()
    }

    /// Snapshot of the live chat entries, in insertion order.
    pub async fn chat_log(&self) -> Vec<ChatEntry> {
        self.shared.chat.lock().await.snapshot().to_vec()
    }

    /// Send a completed stroke with explicit color and width.
    ///
    /// The stroke is inserted locally before the send; the relay echo that
    /// follows is a harmless duplicate since strokes have no identity.
    pub async fn send_stroke(
        &self,
        points: Vec<Point>,
        color: impl Into<String>,
        stroke_width: f32,
    ) -> Result<(), TransportError> {
        if !self.is_connected().await {
            return Err(TransportError::NotConnected);
        }

        let color = color.into();
        let timestamp = now_ms();
        let envelope = Envelope::draw(
            &self.shared.config.room,
            points.clone(),
            color.clone(),
            stroke_width,
            timestamp,
        );

        let stroke = Stroke::new(points, color, stroke_width, timestamp);
        self.shared.strokes.lock().await.insert(stroke.clone());
        let _ = self.shared.event_tx.send(BoardEvent::StrokeAdded(stroke));

        self.send_envelope(&envelope).await
    }

    /// Send a chat message. Leading/trailing whitespace is trimmed; an
    /// empty message is silently skipped (caller policy, not protocol).
    pub async fn send_chat(&self, text: impl AsRef<str>) -> Result<(), TransportError> {
        let text = text.as_ref().trim();
        if text.is_empty() {
            return Ok(());
        }
        if !self.is_connected().await {
            return Err(TransportError::NotConnected);
        }

        let timestamp = now_ms();
        let envelope = Envelope::text(&self.shared.config.room, text, timestamp);

        let entry = ChatEntry::local(text, timestamp);
        self.shared.chat.lock().await.insert(entry.clone());
        let _ = self.shared.event_tx.send(BoardEvent::ChatAdded(entry));

        self.send_envelope(&envelope).await
    }

    /// Tear the client down: manual disconnect plus cancellation of the
    /// eviction tick and control loop. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        Self::step(&self.shared, FsmInput::DisconnectRequested).await;
        if let Some(handle) = self.evict_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.control_task.take() {
            handle.abort();
        }
    }

    async fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let outgoing = self.shared.outgoing.lock().await;
        let tx = outgoing.as_ref().ok_or(TransportError::NotConnected)?;
        tx.send(Message::Text(envelope.encode().into()))
            .map_err(|_| TransportError::WriteFailed)
    }

    /// Serialize transport events and timer firings into the state machine.
    async fn control_loop(
        shared: Arc<ClientShared>,
        mut inputs: mpsc::UnboundedReceiver<FsmInput>,
    ) {
        while let Some(input) = inputs.recv().await {
            Self::step(&shared, input).await;
        }
    }

    /// Apply one input to the state machine and execute the resulting
    /// action. Follow-up inputs produced by an action (arming a retry
    /// timer) are applied in the same call.
    async fn step(shared: &Arc<ClientShared>, input: FsmInput) {
        let mut next = Some(input);
        while let Some(input) = next.take() {
            let (old, new, action) = {
                let mut fsm = shared.fsm.lock().await;
                let old = fsm.state();
                let action = fsm.apply(input);
                (old, fsm.state(), action)
            };

            if new != old {
                log::info!("connection state: {old:?} -> {new:?}");
                let _ = shared.event_tx.send(BoardEvent::StateChanged(new));
            }

            match action {
                FsmAction::None => {}
                FsmAction::OpenTransport => {
                    Self::cancel_retry(shared).await;
                    tokio::spawn(Self::open_transport(Arc::clone(shared)));
                }
                FsmAction::CloseTransport => {
                    Self::cancel_retry(shared).await;
                    Self::close_transport(shared).await;
                }
                FsmAction::ScheduleRetry => {
                    let mut retry = shared.retry.lock().await;
                    if let Some(old_timer) = retry.take() {
                        old_timer.abort();
                    }
                    let delay = shared.config.reconnect_delay;
                    let input_tx = shared.input_tx.clone();
                    *retry = Some(tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        log::info!("attempting to reconnect");
                        let _ = input_tx.send(FsmInput::RetryFired);
                    }));
                    drop(retry);
                    next = Some(FsmInput::RetryScheduled);
                }
                FsmAction::CancelRetry => {
                    Self::cancel_retry(shared).await;
                }
            }
        }
    }

    async fn cancel_retry(shared: &Arc<ClientShared>) {
        if let Some(handle) = shared.retry.lock().await.take() {
            handle.abort();
        }
    }

    async fn close_transport(shared: &Arc<ClientShared>) {
        if let Some(tx) = shared.outgoing.lock().await.take() {
            // Queue a close frame; the writer task sends it and then winds
            // down when this last sender drops.
            let _ = tx.send(Message::Close(None));
        }
        if let Some(handle) = shared.reader.lock().await.take() {
            handle.abort();
        }
    }

    /// Open the WebSocket and spawn the reader/writer tasks.
    async fn open_transport(shared: Arc<ClientShared>) {
        let url = shared.config.server_url.clone();
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                let (mut ws_tx, mut ws_rx) = ws_stream.split();

                let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
                *shared.outgoing.lock().await = Some(out_tx);

                // Writer task: forward the outbound queue to the socket.
                tokio::spawn(async move {
                    while let Some(msg) = out_rx.recv().await {
                        if ws_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                });

                let _ = shared.input_tx.send(FsmInput::TransportOpened);

                // Reader task: decode inbound frames until the stream ends.
                let reader_shared = Arc::clone(&shared);
                let handle = tokio::spawn(async move {
                    while let Some(incoming) = ws_rx.next().await {
                        match incoming {
                            Ok(Message::Text(raw)) => {
                                Self::handle_frame(&reader_shared, raw.as_str()).await;
                            }
                            Ok(Message::Close(_)) => break,
                            Ok(_) => {}
                            Err(e) => {
                                log::warn!("websocket error: {e}");
                                break;
                            }
                        }
                    }
                    let _ = reader_shared.input_tx.send(FsmInput::TransportLost);
                });
                *shared.reader.lock().await = Some(handle);
            }
            Err(e) => {
                log::warn!("connect to {url} failed: {e}");
                let _ = shared.input_tx.send(FsmInput::TransportLost);
            }
        }
    }

    /// Decode one inbound frame and fold it into the local stores.
    ///
    /// Malformed frames are dropped with a diagnostic; they are never a
    /// connection-level failure.
    async fn handle_frame(shared: &Arc<ClientShared>, raw: &str) {
        let envelope = match Envelope::decode(raw) {
            Ok(env) => env,
            Err(e) => {
                log::warn!("dropping undecodable frame: {e}");
                return;
            }
        };

        match envelope.decode_payload() {
            Ok(Payload::Draw(draw)) => {
                let stroke = Stroke::new(
                    draw.points,
                    draw.color,
                    draw.stroke_width,
                    envelope.timestamp,
                );
                shared.strokes.lock().await.insert(stroke.clone());
                let _ = shared.event_tx.send(BoardEvent::StrokeAdded(stroke));
            }
            Ok(Payload::Text(text)) => {
                let entry = ChatEntry::remote(text.text, envelope.timestamp);
                shared.chat.lock().await.insert(entry.clone());
                let _ = shared.event_tx.send(BoardEvent::ChatAdded(entry));
            }
            Err(e) => {
                log::warn!("dropping envelope with bad payload: {e}");
            }
        }
    }

    /// Periodic sweep over both stores.
    async fn evict_loop(shared: Arc<ClientShared>) {
        let mut tick = tokio::time::interval(shared.config.evict_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stroke_lifetime = shared.config.stroke_lifetime.as_millis() as u64;
        let chat_lifetime = shared.config.chat_lifetime.as_millis() as u64;

        loop {
            tick.tick().await;
            let now = now_ms();
            let strokes = shared.strokes.lock().await.evict(now, stroke_lifetime);
            let chat = shared.chat.lock().await.evict(now, chat_lifetime);
            if strokes || chat {
                let _ = shared.event_tx.send(BoardEvent::Expired { strokes, chat });
            }
        }
    }
}

impl Drop for BoardClient {
    fn drop(&mut self) {
        if let Some(handle) = self.evict_task.take() {
            handle.abort();
        }
        if let Some(handle) = self.control_task.take() {
            handle.abort();
        }
        if let Ok(mut retry) = self.shared.retry.try_lock() {
            if let Some(handle) = retry.take() {
                handle.abort();
            }
        }
        if let Ok(mut reader) = self.shared.reader.try_lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }
}
