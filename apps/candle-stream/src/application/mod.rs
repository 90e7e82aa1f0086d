//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for storage, fan-out, identity and the feed.
pub mod ports;

/// Aggregation, commit scheduling and subscription services.
pub mod services;
