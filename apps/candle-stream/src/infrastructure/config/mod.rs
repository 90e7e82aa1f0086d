//! Configuration Module
//!
//! Environment-driven configuration for the candle service.

mod settings;

pub use settings::{
    CandleSettings, ConfigError, DatabaseSettings, FeedSettings, ServerSettings, ServiceConfig,
};
