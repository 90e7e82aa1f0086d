//! Domain Layer - Core candle types and subscription bookkeeping.
//!
//! This layer contains the core domain types with no I/O. All types here
//! are plain Rust with serialization support.

/// Ticks, candles and bucket alignment.
pub mod candle;

/// Subscriber identity and symbol bookkeeping.
pub mod subscription;
