//! Time-windowed ephemeral storage for strokes and chat entries.
//!
//! Both the whiteboard and the chat keep a rolling, self-cleaning window of
//! recent activity: items are appended as they arrive and swept out once
//! their age exceeds a fixed lifetime. One generic store serves both, with
//! independent lifetimes (30 s for strokes, 15 s for chat).
//!
//! Eviction is driven by an external periodic tick (the client runs one
//! sweep per second), not by inserts or a capacity bound, so expiry latency
//! stays within one tick period regardless of message volume.

use crate::protocol::Point;

/// Default lifetime for whiteboard strokes.
pub const STROKE_LIFETIME_MS: u64 = 30_000;

/// Default lifetime for chat entries.
pub const CHAT_LIFETIME_MS: u64 = 15_000;

/// Default sweep interval.
pub const EVICT_INTERVAL_MS: u64 = 1_000;

/// Items that carry a wall-clock timestamp in milliseconds.
pub trait Timestamped {
    fn timestamp_ms(&self) -> u64;
}

/// A completed freehand stroke as held by a client.
///
/// Immutable once created; it has no identity beyond containment in the
/// store and is destroyed by eviction once its age exceeds the stroke
/// lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub points: Vec<Point>,
    pub color: String,
    pub stroke_width: f32,
    pub received_at: u64,
}

impl Stroke {
    pub fn new(
        points: Vec<Point>,
        color: impl Into<String>,
        stroke_width: f32,
        received_at: u64,
    ) -> Self {
        Self {
            points,
            color: color.into(),
            stroke_width,
            received_at,
        }
    }
}

impl Timestamped for Stroke {
    fn timestamp_ms(&self) -> u64 {
        self.received_at
    }
}

/// A chat entry as held by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub text: String,
    pub received_at: u64,
    /// Whether this entry was authored locally. Display-only; never sent
    /// over the wire.
    pub is_local: bool,
}

impl ChatEntry {
    /// Entry authored on this client.
    pub fn local(text: impl Into<String>, received_at: u64) -> Self {
        Self {
            text: text.into(),
            received_at,
            is_local: true,
        }
    }

    /// Entry received from the relay.
    pub fn remote(text: impl Into<String>, received_at: u64) -> Self {
        Self {
            text: text.into(),
            received_at,
            is_local: false,
        }
    }
}

impl Timestamped for ChatEntry {
    fn timestamp_ms(&self) -> u64 {
        self.received_at
    }
}

/// Insertion-ordered collection with bulk age-based eviction.
#[derive(Debug)]
pub struct EphemeralStore<T> {
    items: Vec<T>,
}

impl<T> Default for EphemeralStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EphemeralStore<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Append an item. Always succeeds; growth is unbounded between sweeps.
    pub fn insert(&mut self, item: T) {
        self.items.push(item);
    }

    /// Read-only view of the current items in insertion order.
    pub fn snapshot(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Timestamped> EphemeralStore<T> {
    /// Remove every item strictly older than `lifetime_ms` at time `now_ms`.
    ///
    /// An item exactly at the lifetime boundary is retained. Relative order
    /// of survivors is preserved. Returns whether anything was removed,
    /// which callers use as a redraw signal.
    pub fn evict(&mut self, now_ms: u64, lifetime_ms: u64) -> bool {
        let before = self.items.len();
        self.items
            .retain(|item| now_ms.saturating_sub(item.timestamp_ms()) <= lifetime_ms);
        self.items.len() != before
    }
}
