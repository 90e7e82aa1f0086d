//! `PostgreSQL` candle repository.
//!
//! Completed candles are upserted into the `candlestick` table keyed on
//! `(symbol, bucket_start)`. The schema lives in `migrations/` and is applied
//! with [`PgCandleRepository::migrate`].

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{debug, info};

use crate::application::ports::{CandleRepository, RepositoryError};
use crate::domain::candle::Candle;

const UPSERT_CANDLE: &str = r"
    INSERT INTO candlestick (
        symbol, open_price, high_price, low_price, close_price, bucket_start
    ) VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (symbol, bucket_start) DO UPDATE SET
        open_price = EXCLUDED.open_price,
        high_price = EXCLUDED.high_price,
        low_price = EXCLUDED.low_price,
        close_price = EXCLUDED.close_price
";

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for RepositoryError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Migration(err.to_string())
    }
}

/// Candle repository backed by a `PostgreSQL` pool.
#[derive(Debug, Clone)]
pub struct PgCandleRepository {
    pool: PgPool,
}

impl PgCandleRepository {
    /// Connect a pool to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "PostgreSQL connection pool initialized");

        Ok(Self { pool })
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Migration`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }
}

#[async_trait]
impl CandleRepository for PgCandleRepository {
    async fn upsert_candle(&self, candle: &Candle) -> Result<(), RepositoryError> {
        sqlx::query(UPSERT_CANDLE)
            .bind(&candle.symbol)
            .bind(candle.open)
            .bind(candle.high)
            .bind(candle.low)
            .bind(candle.close)
            .bind(candle.bucket_start)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        debug!(
            symbol = %candle.symbol,
            bucket_start = %candle.bucket_start,
            "Candle upserted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_updates_every_price_column() {
        for column in ["open_price", "high_price", "low_price", "close_price"] {
            assert!(UPSERT_CANDLE.contains(&format!("{column} = EXCLUDED.{column}")));
        }
        assert!(UPSERT_CANDLE.contains("ON CONFLICT (symbol, bucket_start)"));
    }

    #[test]
    fn sqlx_errors_map_to_repository_errors() {
        let err: RepositoryError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, RepositoryError::Connection(_)));
    }
}
