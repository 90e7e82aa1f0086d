//! Candle Aggregation Service
//!
//! Owns the in-memory map of open candles. Ticks are folded in one at a
//! time by the ingestion loop; completed candles are drained to storage by
//! the commit scheduler.
//!
//! # Locking
//!
//! The candle map sits behind a single `parking_lot::Mutex` that is only
//! held for map reads and writes. Publishing and storage calls always run
//! on released snapshots, so a slow subscriber or a slow database never
//! stalls tick application.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::ports::{CandlePublisher, CandleRepository, RepositoryError};
use crate::domain::candle::{Candle, CandleError, CandleInterval, CandleKey, Tick};
use crate::domain::subscription::{Symbol, normalize_symbol};
use crate::infrastructure::metrics;

// =============================================================================
// Errors and Reports
// =============================================================================

/// A commit pass stopped because storage rejected a candle.
#[derive(Debug, Error)]
#[error("failed to persist candle {symbol}@{bucket_start} after {persisted} succeeded: {source}")]
pub struct DrainError {
    /// Symbol of the candle that failed.
    pub symbol: Symbol,
    /// Bucket of the candle that failed.
    pub bucket_start: DateTime<Utc>,
    /// Candles persisted (and removed) earlier in the same pass.
    pub persisted: usize,
    /// Underlying storage error.
    #[source]
    pub source: RepositoryError,
}

/// Outcome of a successful commit pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Candles written to storage.
    pub persisted: usize,
    /// Candles written but kept in memory because a tick arrived while the
    /// write was in flight; they are written again on the next pass.
    pub retained: usize,
}

#[derive(Debug)]
struct OpenCandle {
    candle: Candle,
    revision: u64,
}

// =============================================================================
// Aggregator
// =============================================================================

/// Folds ticks into per-symbol, per-bucket OHLC candles.
pub struct CandleAggregator {
    interval: CandleInterval,
    candles: Mutex<HashMap<CandleKey, OpenCandle>>,
    repository: Arc<dyn CandleRepository>,
    publisher: Arc<dyn CandlePublisher>,
    drain_guard: tokio::sync::Mutex<()>,
}

impl CandleAggregator {
    /// Create an aggregator.
    #[must_use]
    pub fn new(
        interval: CandleInterval,
        repository: Arc<dyn CandleRepository>,
        publisher: Arc<dyn CandlePublisher>,
    ) -> Self {
        Self {
            interval,
            candles: Mutex::new(HashMap::new()),
            repository,
            publisher,
            drain_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Bucket width.
    #[must_use]
    pub const fn interval(&self) -> CandleInterval {
        self.interval
    }

    /// Apply one tick and publish the resulting candle state.
    ///
    /// The tick counts as applied regardless of what happens during
    /// publishing. Prices are taken as-is; zero and negative values are
    /// not rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CandleError::EmptySymbol`] if the tick's symbol is blank.
    pub fn apply_tick(&self, tick: &Tick) -> Result<Candle, CandleError> {
        let symbol = normalize_symbol(&tick.symbol).ok_or(CandleError::EmptySymbol)?;
        let bucket_start = self.interval.bucket_start(tick.event_time);
        let key = CandleKey::new(symbol, bucket_start);

        let (snapshot, open_count) = {
            let mut candles = self.candles.lock();
            let snapshot = match candles.entry(key) {
                Entry::Occupied(mut entry) => {
                    let open = entry.get_mut();
                    open.candle.apply(tick.price);
                    open.revision += 1;
                    open.candle.clone()
                }
                Entry::Vacant(entry) => {
                    let candle = Candle::new(entry.key().symbol.clone(), bucket_start, tick.price);
                    entry.insert(OpenCandle {
                        candle: candle.clone(),
                        revision: 0,
                    });
                    candle
                }
            };
            (snapshot, candles.len())
        };

        metrics::record_candle_update();
        metrics::set_open_candles(open_count);

        self.publisher.publish(&snapshot);
        Ok(snapshot)
    }

    /// Persist every candle whose bucket ended at or before `cutoff`.
    ///
    /// Candles are written oldest first. A candle is removed from memory
    /// only once storage accepted it and no tick touched it while the write
    /// was in flight. The first storage failure stops the pass; candles
    /// already removed earlier in the pass stay removed.
    ///
    /// Concurrent calls are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`DrainError`] describing the candle that failed.
    pub async fn drain_completed_candles(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<DrainReport, DrainError> {
        let _pass = self.drain_guard.lock().await;
        let started = Instant::now();

        let mut due: Vec<(CandleKey, Candle, u64)> = {
            let candles = self.candles.lock();
            candles
                .iter()
                .filter(|(key, _)| self.interval.bucket_end(key.bucket_start) <= cutoff)
                .map(|(key, open)| (key.clone(), open.candle.clone(), open.revision))
                .collect()
        };
        due.sort_by(|a, b| a.0.cmp(&b.0));

        let mut report = DrainReport::default();
        for (key, candle, revision) in due {
            if let Err(source) = self.repository.upsert_candle(&candle).await {
                metrics::record_drain(report.persisted, true, started.elapsed());
                warn!(
                    symbol = %candle.symbol,
                    bucket_start = %candle.bucket_start,
                    persisted = report.persisted,
                    error = %source,
                    "Commit pass stopped on storage failure"
                );
                return Err(DrainError {
                    symbol: candle.symbol,
                    bucket_start: candle.bucket_start,
                    persisted: report.persisted,
                    source,
                });
            }

            report.persisted += 1;
            let removed = {
                let mut candles = self.candles.lock();
                match candles.get(&key) {
                    Some(open) if open.revision == revision => {
                        candles.remove(&key);
                        true
                    }
                    _ => false,
                }
            };
            if !removed {
                report.retained += 1;
                debug!(
                    symbol = %key.symbol,
                    bucket_start = %key.bucket_start,
                    "Candle changed during write; keeping it for the next pass"
                );
            }
        }

        metrics::record_drain(report.persisted, false, started.elapsed());
        metrics::set_open_candles(self.open_candle_count());

        if report.persisted > 0 {
            info!(
                persisted = report.persisted,
                retained = report.retained,
                cutoff = %cutoff,
                "Committed completed candles"
            );
        }
        Ok(report)
    }

    /// Persist every candle held, including the current bucket.
    ///
    /// Used once on shutdown.
    ///
    /// # Errors
    ///
    /// Same as [`Self::drain_completed_candles`].
    pub async fn flush_all(&self) -> Result<DrainReport, DrainError> {
        self.drain_completed_candles(DateTime::<Utc>::MAX_UTC).await
    }

    /// Number of candles held in memory.
    #[must_use]
    pub fn open_candle_count(&self) -> usize {
        self.candles.lock().len()
    }

    /// Current state of one candle, if held.
    #[must_use]
    pub fn snapshot(&self, key: &CandleKey) -> Option<Candle> {
        self.candles.lock().get(key).map(|open| open.candle.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================
