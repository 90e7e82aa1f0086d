//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driver Ports (Inbound)
//!
//! - `FeedEvent`: what an ingestion adapter pushes into the tick channel
//!
//! ## Driven Ports (Outbound)
//!
//! - `CandleRepository`: durable storage for completed candles
//! - `CandleSink`: non-blocking delivery of candle updates to one subscriber
//! - `CandlePublisher`: fan-out of every candle update
//! - `SubscriberIdGenerator`: identity for new subscribers

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::candle::{Candle, Tick};
use crate::domain::subscription::SubscriberId;

// =============================================================================
// Errors
// =============================================================================

/// Errors from candle storage.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Could not reach the database.
    #[error("storage connection error: {0}")]
    Connection(String),

    /// Statement failed.
    #[error("storage query error: {0}")]
    Query(String),

    /// Schema migration failed.
    #[error("storage migration error: {0}")]
    Migration(String),
}

/// Why a sink refused an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Subscriber buffer is full; this update is dropped for it.
    #[error("subscriber buffer full")]
    Full,

    /// Subscriber went away; it should be removed.
    #[error("subscriber stream closed")]
    Closed,
}

/// Errors from subscriber ID generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Wall clock moved backwards past the last issued ID.
    #[error("clock moved backwards by {0}ms")]
    ClockMovedBackwards(i64),

    /// Node number outside the allowed range.
    #[error("node number {node} out of range (max {max})")]
    InvalidNode {
        /// Requested node.
        node: i64,
        /// Highest allowed node.
        max: i64,
    },
}

// =============================================================================
// Ports
// =============================================================================

/// Events emitted by an ingestion adapter on the shared tick channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Upstream connection established (initial or after reconnect).
    Connected,
    /// Upstream connection lost.
    Disconnected,
    /// About to retry the connection.
    Reconnecting {
        /// 1-based retry attempt.
        attempt: u32,
        /// Backoff delay before this attempt.
        delay: Duration,
    },
    /// A decoded trade.
    Trade(Tick),
    /// Terminal or notable adapter error.
    Error(String),
}

/// Durable storage for completed candles.
///
/// `upsert_candle` is keyed by `(symbol, bucket_start)`; writing the same
/// candle twice leaves one row with the latest prices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// Insert or update one candle.
    async fn upsert_candle(&self, candle: &Candle) -> Result<(), RepositoryError>;
}

/// Per-subscriber delivery endpoint. Must never block.
pub trait CandleSink: Send + Sync {
    /// Offer one update to the subscriber.
    ///
    /// # Errors
    ///
    /// [`SinkError::Full`] when the buffer is saturated, [`SinkError::Closed`]
    /// when the subscriber has gone away.
    fn try_send(&self, candle: &Candle) -> Result<(), SinkError>;
}

/// Receives every candle update produced by the aggregator.
pub trait CandlePublisher: Send + Sync {
    /// Deliver an update. Outcomes are handled by the publisher itself.
    fn publish(&self, candle: &Candle);
}

/// Source of unique subscriber identifiers.
pub trait SubscriberIdGenerator: Send + Sync {
    /// Produce a fresh non-zero ID.
    ///
    /// # Errors
    ///
    /// Returns [`IdError`] if an ID cannot be issued right now.
    fn next_id(&self) -> Result<SubscriberId, IdError>;
}

/// Publisher that discards everything. Used when no fan-out is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl CandlePublisher for NoopPublisher {
    fn publish(&self, _candle: &Candle) {}
}
