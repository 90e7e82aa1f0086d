//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `CandleAggregator`: folds ticks into candles and drains completed ones
//! - `CommitScheduler`: interval-aligned commit loop
//! - `SubscriptionRegistry`: subscriber bookkeeping and candle fan-out
//! - `pipeline`: the tick consumer loop between the feed and the aggregator

pub mod aggregator;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

pub use aggregator::{CandleAggregator, DrainError, DrainReport};
pub use pipeline::consume_feed_events;
pub use registry::{
    PublishReport, RegistryError, SubscribeOutcome, SubscriptionRegistry, UnsubscribeOutcome,
};
pub use scheduler::CommitScheduler;
