//! Binance WebSocket Adapter
//!
//! Streams aggregate trades for a configured symbol list and turns them
//! into [`FeedEvent`](crate::application::ports::FeedEvent)s on the tick
//! channel.

pub mod client;
pub mod codec;
pub mod connection;
pub mod messages;
pub mod reconnect;
pub mod status;

pub use client::{BinanceClient, BinanceClientConfig, BinanceClientError};
pub use codec::{CodecError, JsonCodec};
pub use connection::{FeedConnection, FeedConnector, FeedFrame, TungsteniteConnector};
pub use messages::{AggTradeMessage, BinanceMessage};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use status::{ConnectionState, FeedStatus, FeedStatusSnapshot};
