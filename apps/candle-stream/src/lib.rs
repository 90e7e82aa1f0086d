#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Candle Stream - Trade-to-Candlestick Aggregator
//!
//! Keeps one WebSocket connection to Binance's aggregate trade streams,
//! folds every trade into a per-symbol OHLC candle for the current
//! interval, persists candles once their interval closes, and pushes every
//! candle change to gRPC subscribers watching that symbol.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `candle`: Ticks, candles and interval bucket alignment
//!   - `subscription`: Symbol normalization and the subscriber book
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Repository, sink, publisher and ID generator interfaces
//!   - `services`: Aggregator, commit scheduler, subscription registry
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Aggregate trade WebSocket client
//!   - `grpc`: Candle streaming server
//!   - `persistence`: PostgreSQL and in-memory candle storage
//!   - `ids`: Snowflake and sequential subscriber IDs
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Binance WS ──► tick channel ──► CandleAggregator ──► SubscriptionRegistry ──► gRPC subscriber 1
//!                                       │                                  ──► gRPC subscriber N
//!                                       ▼
//!                           CommitScheduler (interval aligned)
//!                                       │
//!                                       ▼
//!                                  PostgreSQL
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core candle types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::candle::{Candle, CandleError, CandleInterval, CandleKey, Tick};
pub use domain::subscription::{SubscriberId, SubscriptionBook, SubscriptionError, Symbol};

// Ports
pub use application::ports::{
    CandlePublisher, CandleRepository, CandleSink, FeedEvent, IdError, RepositoryError, SinkError,
    SubscriberIdGenerator,
};

// Services
pub use application::services::{
    CandleAggregator, CommitScheduler, DrainError, DrainReport, SubscriptionRegistry,
    consume_feed_events,
};

// Infrastructure config
pub use infrastructure::config::{
    CandleSettings, ConfigError, DatabaseSettings, FeedSettings, ServerSettings, ServiceConfig,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Binance client (for integration tests)
pub use infrastructure::binance::{
    BinanceClient, BinanceClientConfig, BinanceClientError, ConnectionState, FeedStatus,
    ReconnectConfig, TungsteniteConnector,
};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{
    proto::candles::v1 as proto,
    server::{CandleStreamServer, CandleStreamServerConfig},
};

// Storage and IDs
pub use infrastructure::ids::{SequentialIdGenerator, SnowflakeIdGenerator};
pub use infrastructure::persistence::{InMemoryCandleRepository, PgCandleRepository};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
