//! In-process candle repository.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::application::ports::{CandleRepository, RepositoryError};
use crate::domain::candle::{Candle, CandleKey};

/// Candle store kept in memory. Same upsert semantics as the database.
#[derive(Debug, Default)]
pub struct InMemoryCandleRepository {
    candles: Mutex<HashMap<CandleKey, Candle>>,
    writes: AtomicU64,
    failures_pending: AtomicU32,
}

impl InMemoryCandleRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored candles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.lock().len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.lock().is_empty()
    }

    /// Stored candle for `(symbol, bucket_start)`.
    #[must_use]
    pub fn get(&self, symbol: &str, bucket_start: DateTime<Utc>) -> Option<Candle> {
        self.candles
            .lock()
            .get(&CandleKey::new(symbol, bucket_start))
            .cloned()
    }

    /// Every stored candle, ordered by bucket then symbol.
    #[must_use]
    pub fn all(&self) -> Vec<Candle> {
        let mut candles: Vec<Candle> = self.candles.lock().values().cloned().collect();
        candles.sort_by(|a, b| a.key().cmp(&b.key()));
        candles
    }

    /// Successful upserts so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Make the next `n` upserts fail with a query error.
    pub fn fail_next(&self, n: u32) {
        self.failures_pending.store(n, Ordering::Relaxed);
    }

    fn take_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn upsert_candle(&self, candle: &Candle) -> Result<(), RepositoryError> {
        if self.take_failure() {
            return Err(RepositoryError::Query("injected failure".to_string()));
        }
        self.candles.lock().insert(candle.key(), candle.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use tokio_test::{assert_err, assert_ok};

    fn candle(price: i64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        Candle::new("BTCUSDT", start, Decimal::new(price, 0))
    }

    #[tokio::test]
    async fn upsert_replaces_same_key() {
        let repo = InMemoryCandleRepository::new();
        let first = candle(100);
        let mut second = first.clone();
        second.apply(Decimal::new(120, 0));

        repo.upsert_candle(&first).await.unwrap();
        repo.upsert_candle(&second).await.unwrap();

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.write_count(), 2);
        assert_eq!(repo.get("BTCUSDT", first.bucket_start), Some(second));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let repo = InMemoryCandleRepository::new();
        repo.fail_next(2);

        assert_err!(repo.upsert_candle(&candle(1)).await);
        assert_err!(repo.upsert_candle(&candle(1)).await);
        assert_ok!(repo.upsert_candle(&candle(1)).await);
        assert_eq!(repo.write_count(), 1);
        assert!(!repo.is_empty());
    }
}
