//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Binance aggregate trade WebSocket adapter.
pub mod binance;

/// gRPC candle streaming server implementation.
pub mod grpc;

/// Candle storage adapters (PostgreSQL, in-memory).
pub mod persistence;

/// Subscriber ID generators.
pub mod ids;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
