//! # scrawl-collab — real-time sync core for the scrawl shared whiteboard
//!
//! Several participants share a live drawing surface and a short-lived text
//! chat over a single WebSocket channel, relayed through a central server.
//! Everything is memory-only and session-scoped: both the whiteboard and
//! the chat keep a rolling, self-cleaning window of recent activity and
//! nothing survives a restart.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐      WebSocket       ┌─────────────────┐
//! │  BoardClient   │ ◄──────────────────► │      Relay      │
//! │  (per user)    │     JSON frames      │    (central)    │
//! └───────┬────────┘                      └────────┬────────┘
//!         │                                        │
//!         ▼                                        ▼
//! ┌────────────────┐                      ┌─────────────────┐
//! │ EphemeralStore │ ×2 (strokes, chat)   │ SessionRegistry │
//! │  (1 s sweep)   │                      │ (verbatim       │
//! └────────────────┘                      │  fan-out)       │
//!                                         └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire envelope and payload codec
//! - [`store`] — time-windowed ephemeral storage with bulk eviction
//! - [`relay`] — broadcast relay server (echoes to everyone, sender included)
//! - [`client`] — client session with explicit reconnect state machine
//!
//! The relay is purely in-flight: it never decodes frames and holds no
//! history. Only clients hold the ephemeral stores, so the relay stays
//! stateless about message semantics and each client remains the sole
//! source of truth for its own view.

pub mod client;
pub mod protocol;
pub mod relay;
pub mod store;

// Re-exports for convenience
pub use client::{
    BoardClient, BoardEvent, ClientConfig, ConnectionState, FsmAction, FsmInput, SessionFsm,
    TransportError,
};
pub use protocol::{
    now_ms, DecodeError, DrawPayload, Envelope, EnvelopeKind, Payload, Point, TextPayload,
    DEFAULT_COLOR, DEFAULT_ROOM, DEFAULT_STROKE_WIDTH,
};
pub use relay::{Relay, RelayConfig, RelayError, RelayStats, SessionRegistry};
pub use store::{
    ChatEntry, EphemeralStore, Stroke, Timestamped, CHAT_LIFETIME_MS, EVICT_INTERVAL_MS,
    STROKE_LIFETIME_MS,
};
