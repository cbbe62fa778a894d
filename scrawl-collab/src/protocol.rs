//! JSON wire protocol for whiteboard and chat synchronization.
//!
//! Wire format (one JSON object per WebSocket text frame):
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ { "type":      "draw" | "message",                           │
//! │   "roomId":    "demoRoom",                                   │
//! │   "payload":   "<JSON string, schema depends on type>",      │
//! │   "timestamp": 1712345678901 }                               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The payload is double-encoded: the envelope carries it as an opaque JSON
//! string, so the relay forwards frames without ever understanding them and
//! new payload kinds never change the envelope shape.
//!
//! Decoding is pure and defensive. A frame that fails to parse yields an
//! explicit [`DecodeError`] the caller can drop and move past; it never
//! aborts the connection that delivered it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known room identifier shared by all participants.
///
/// The relay never reads this field; it rides along for future multi-room
/// support.
pub const DEFAULT_ROOM: &str = "demoRoom";

/// Default stroke color.
pub const DEFAULT_COLOR: &str = "#000000";

/// Default stroke width.
pub const DEFAULT_STROKE_WIDTH: f32 = 4.0;

/// Errors produced while decoding wire frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The outer envelope or an inner payload was not parseable JSON.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The envelope `type` tag is not one of the known kinds.
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
}

/// Message kinds carried by an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeKind {
    /// A completed freehand stroke.
    #[serde(rename = "draw")]
    Draw,
    /// A chat message.
    #[serde(rename = "message")]
    Text,
}

impl EnvelopeKind {
    /// Wire tag for this kind.
    pub fn as_tag(self) -> &'static str {
        match self {
            EnvelopeKind::Draw => "draw",
            EnvelopeKind::Text => "message",
        }
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Result<Self, DecodeError> {
        match tag {
            "draw" => Ok(EnvelopeKind::Draw),
            "message" => Ok(EnvelopeKind::Text),
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}

/// Single point of a stroke, normalized to [0, 1] on both axes so senders
/// and receivers with different surface sizes agree on relative geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Payload of a `draw` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawPayload {
    pub points: Vec<Point>,
    pub color: String,
    #[serde(rename = "strokeWidth")]
    pub stroke_width: f32,
}

/// Payload of a `message` envelope.
///
/// The text is sender-trimmed by convention. Non-emptiness is caller
/// policy, not a protocol invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub text: String,
}

/// Decoded payload of an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Draw(DrawPayload),
    Text(TextPayload),
}

/// Top-level wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(rename = "roomId")]
    pub room: String,
    /// Opaque serialized payload; schema depends on `kind`.
    pub payload: String,
    /// Sender-assigned milliseconds since the Unix epoch. Never validated
    /// or re-stamped in flight; used only for client-side expiry.
    pub timestamp: u64,
}

/// Envelope with the kind tag still a string, so an unrecognized `type`
/// classifies as [`DecodeError::UnknownKind`] instead of `Malformed`.
#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "roomId")]
    room: String,
    payload: String,
    timestamp: u64,
}

impl Envelope {
    /// Create a draw envelope from a completed stroke.
    pub fn draw(
        room: impl Into<String>,
        points: Vec<Point>,
        color: impl Into<String>,
        stroke_width: f32,
        timestamp: u64,
    ) -> Self {
        let payload = DrawPayload {
            points,
            color: color.into(),
            stroke_width,
        };
        Self {
            kind: EnvelopeKind::Draw,
            room: room.into(),
            payload: serde_json::to_string(&payload).unwrap_or_default(),
            timestamp,
        }
    }

    /// Create a chat message envelope.
    pub fn text(room: impl Into<String>, text: impl Into<String>, timestamp: u64) -> Self {
        let payload = TextPayload { text: text.into() };
        Self {
            kind: EnvelopeKind::Text,
            room: room.into(),
            payload: serde_json::to_string(&payload).unwrap_or_default(),
            timestamp,
        }
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserialize from the JSON wire format.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let wire: WireEnvelope =
            serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let kind = EnvelopeKind::from_tag(&wire.kind)?;
        Ok(Self {
            kind,
            room: wire.room,
            payload: wire.payload,
            timestamp: wire.timestamp,
        })
    }

    /// Parse the inner payload according to this envelope's kind.
    pub fn decode_payload(&self) -> Result<Payload, DecodeError> {
        match self.kind {
            EnvelopeKind::Draw => {
                let payload: DrawPayload = serde_json::from_str(&self.payload)
                    .map_err(|e| DecodeError::Malformed(e.to_string()))?;
                Ok(Payload::Draw(payload))
            }
            EnvelopeKind::Text => {
                let payload: TextPayload = serde_json::from_str(&self.payload)
                    .map_err(|e| DecodeError::Malformed(e.to_string()))?;
                Ok(Payload::Text(payload))
            }
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
