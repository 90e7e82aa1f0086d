//! Candle storage adapters.
//!
//! - [`PgCandleRepository`]: `PostgreSQL` via `SQLx`, used in production
//! - [`InMemoryCandleRepository`]: process-local map, used in dev mode and tests

mod memory;
mod postgres;

pub use memory::InMemoryCandleRepository;
pub use postgres::PgCandleRepository;
