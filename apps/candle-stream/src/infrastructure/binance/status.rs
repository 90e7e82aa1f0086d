//! Shared view of the feed connection, read by the health endpoint.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Adapter connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying.
    Disconnected,
    /// Opening a connection.
    Connecting,
    /// Connected and reading frames.
    Streaming,
    /// Waiting to retry after a dropped connection.
    Reconnecting,
}

impl ConnectionState {
    /// Lower-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Point-in-time copy of [`FeedStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatusSnapshot {
    /// Current state.
    pub state: ConnectionState,
    /// Last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error seen, cleared on connect.
    pub last_error: Option<String>,
    /// Retries in the current outage.
    pub reconnect_attempts: u32,
    /// Frames read since start.
    pub frames_received: u64,
    /// Ticks forwarded since start.
    pub ticks_forwarded: u64,
    /// Frames skipped because they failed to decode.
    pub frames_skipped: u64,
}

/// Connection state shared between the client and observers.
#[derive(Debug)]
pub struct FeedStatus {
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    frames_received: AtomicU64,
    ticks_forwarded: AtomicU64,
    frames_skipped: AtomicU64,
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedStatus {
    /// Create a status in the `Disconnected` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            last_connected_at: RwLock::new(None),
            last_error: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            frames_received: AtomicU64::new(0),
            ticks_forwarded: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
        }
    }

    /// Set the state. Entering `Streaming` clears the error and retry count.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Streaming {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
            self.reconnect_attempts.store(0, Ordering::Relaxed);
        }
    }

    /// Record an error message.
    pub fn set_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    /// Record the current retry attempt.
    pub fn set_reconnect_attempt(&self, attempt: u32) {
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
    }

    /// Count one inbound frame.
    pub fn increment_frames(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one forwarded tick.
    pub fn increment_ticks(&self) {
        self.ticks_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one skipped frame.
    pub fn increment_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the feed is currently streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    /// Copy all fields.
    #[must_use]
    pub fn snapshot(&self) -> FeedStatusSnapshot {
        FeedStatusSnapshot {
            state: self.state(),
            last_connected_at: *self.last_connected_at.read(),
            last_error: self.last_error.read().clone(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            ticks_forwarded: self.ticks_forwarded.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
        }
    }
}
