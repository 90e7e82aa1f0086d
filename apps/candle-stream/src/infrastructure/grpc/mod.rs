//! gRPC Candlestick Service
//!
//! Exposes live candle updates to downstream clients. Each `Subscribe` call:
//!
//! 1. Validates the symbols and assigns a subscriber ID if none was given
//! 2. Sends an acknowledgement frame carrying the ID
//! 3. Registers a sink with the `SubscriptionRegistry`
//! 4. Streams matching candle updates until the client leaves or unsubscribes
//!
//! The generated stubs in `proto/` are checked in; build with the `codegen`
//! feature to regenerate them from `proto/candles/v1/candles.proto`.

pub mod server;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod candles {
        pub mod v1 {
            include!("proto/candles.v1.rs");
        }
    }
}

pub use server::{CandleStreamServer, CandleStreamServerConfig};
