//! Candlestick Domain Types
//!
//! Trade ticks, OHLC candles and the fixed bucketing interval that maps a
//! tick's event time onto the candle it belongs to.
//!
//! A candle is identified by `(symbol, bucket_start)`. Every tick for the
//! same symbol whose event time falls in `[bucket_start, bucket_start +
//! interval)` folds into the same candle:
//!
//! - `open` is the first price seen, `close` the most recent one
//! - `high`/`low` are the running extremes, so `low <= open, close <= high`

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::subscription::Symbol;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by candle domain validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandleError {
    /// Tick carried an empty symbol.
    #[error("tick symbol must not be empty")]
    EmptySymbol,

    /// Interval must be a positive whole number of milliseconds.
    #[error("candle interval must be at least 1ms, got {0:?}")]
    InvalidInterval(Duration),
}

// =============================================================================
// Tick
// =============================================================================

/// A single trade observation normalized from the upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    /// Trading pair, e.g. `BTCUSDT`.
    pub symbol: Symbol,
    /// Trade price.
    pub price: Decimal,
    /// Trade time reported by the exchange.
    pub event_time: DateTime<Utc>,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, price: Decimal, event_time: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            event_time,
        }
    }
}

// =============================================================================
// Candle
// =============================================================================

/// Identity of a candle: one per symbol per bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandleKey {
    /// Bucket start (ordered first so keys sort chronologically).
    pub bucket_start: DateTime<Utc>,
    /// Trading pair.
    pub symbol: Symbol,
}

impl CandleKey {
    /// Create a key.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, bucket_start: DateTime<Utc>) -> Self {
        Self {
            bucket_start,
            symbol: symbol.into(),
        }
    }
}

/// OHLC summary of all ticks for one symbol within one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Trading pair.
    pub symbol: Symbol,
    /// Inclusive start of the bucket.
    pub bucket_start: DateTime<Utc>,
    /// First traded price in the bucket.
    pub open: Decimal,
    /// Highest traded price in the bucket.
    pub high: Decimal,
    /// Lowest traded price in the bucket.
    pub low: Decimal,
    /// Most recent traded price in the bucket.
    pub close: Decimal,
}

impl Candle {
    /// Start a candle from the first traded price of a bucket.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, bucket_start: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold a later price into the candle.
    pub fn apply(&mut self, price: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
    }

    /// Identity of this candle.
    #[must_use]
    pub fn key(&self) -> CandleKey {
        CandleKey::new(self.symbol.clone(), self.bucket_start)
    }

    /// Whether `low <= open, close <= high` holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }
}

// =============================================================================
// Interval
// =============================================================================

/// Fixed bucket width used to align candles.
///
/// Buckets are aligned to the Unix epoch, so a 60s interval yields buckets
/// starting on whole wall-clock minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandleInterval {
    millis: i64,
}

impl CandleInterval {
    /// One-minute candles.
    pub const ONE_MINUTE: Self = Self { millis: 60_000 };

    /// Create an interval from a duration.
    ///
    /// # Errors
    ///
    /// Returns [`CandleError::InvalidInterval`] for sub-millisecond or
    /// out-of-range durations.
    pub fn new(duration: Duration) -> Result<Self, CandleError> {
        match i64::try_from(duration.as_millis()) {
            Ok(millis) if millis > 0 => Ok(Self { millis }),
            _ => Err(CandleError::InvalidInterval(duration)),
        }
    }

    /// Interval width as a std duration.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn as_duration(self) -> Duration {
        Duration::from_millis(self.millis as u64)
    }

    /// Interval width in milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.millis
    }

    /// Start of the bucket containing `ts` (truncation toward the past).
    #[must_use]
    pub fn bucket_start(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let millis = ts.timestamp_millis();
        let start = millis - millis.rem_euclid(self.millis);
        DateTime::from_timestamp_millis(start).unwrap_or(ts)
    }

    /// Exclusive end of the bucket starting at `bucket_start`.
    #[must_use]
    pub fn bucket_end(self, bucket_start: DateTime<Utc>) -> DateTime<Utc> {
        bucket_start
            .checked_add_signed(TimeDelta::milliseconds(self.millis))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// First bucket boundary strictly after `now`.
    #[must_use]
    pub fn next_boundary_after(self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.bucket_end(self.bucket_start(now))
    }

    /// Time remaining from `now` until the next bucket boundary.
    #[must_use]
    pub fn delay_until_next_boundary(self, now: DateTime<Utc>) -> Duration {
        (self.next_boundary_after(now) - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for CandleInterval {
    fn default() -> Self {
        Self::ONE_MINUTE
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal::prelude::FromPrimitive;
    use test_case::test_case;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap() + TimeDelta::milliseconds(i64::from(ms))
    }

    #[test_case(at(10, 0, 0, 0), at(10, 0, 0, 0) ; "exact boundary")]
    #[test_case(at(10, 0, 5, 0), at(10, 0, 0, 0) ; "inside bucket")]
    #[test_case(at(10, 0, 59, 999), at(10, 0, 0, 0) ; "last millisecond")]
    #[test_case(at(10, 1, 0, 0), at(10, 1, 0, 0) ; "next bucket")]
    fn bucket_start_truncates_to_minute(ts: DateTime<Utc>, expected: DateTime<Utc>) {
        assert_eq!(CandleInterval::ONE_MINUTE.bucket_start(ts), expected);
    }

    #[test]
    fn bucket_start_before_epoch_truncates_toward_past() {
        let ts = DateTime::from_timestamp_millis(-1).unwrap();
        let start = CandleInterval::ONE_MINUTE.bucket_start(ts);
        assert_eq!(start.timestamp_millis(), -60_000);
    }

    #[test]
    fn next_boundary_and_delay() {
        let interval = CandleInterval::ONE_MINUTE;
        let now = at(10, 0, 45, 500);

        assert_eq!(interval.next_boundary_after(now), at(10, 1, 0, 0));
        assert_eq!(
            interval.delay_until_next_boundary(now),
            Duration::from_millis(14_500)
        );
    }

    #[test]
    fn delay_on_boundary_is_full_interval() {
        let interval = CandleInterval::ONE_MINUTE;
        assert_eq!(
            interval.delay_until_next_boundary(at(10, 0, 0, 0)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn interval_rejects_zero() {
        assert_eq!(
            CandleInterval::new(Duration::ZERO),
            Err(CandleError::InvalidInterval(Duration::ZERO))
        );
        assert_eq!(
            CandleInterval::new(Duration::from_secs(5)).unwrap().as_millis(),
            5_000
        );
    }

    #[test]
    fn candle_tracks_open_high_low_close() {
        let mut candle = Candle::new("BTCUSDT", at(10, 0, 0, 0), Decimal::new(100, 0));

        candle.apply(Decimal::new(105, 0));
        candle.apply(Decimal::new(95, 0));
        candle.apply(Decimal::new(101, 0));

        assert_eq!(candle.open, Decimal::new(100, 0));
        assert_eq!(candle.high, Decimal::new(105, 0));
        assert_eq!(candle.low, Decimal::new(95, 0));
        assert_eq!(candle.close, Decimal::new(101, 0));
        assert!(candle.is_consistent());
    }

    #[test]
    fn single_tick_candle_is_flat() {
        let candle = Candle::new("ETHUSDT", at(10, 0, 0, 0), Decimal::new(3000, 0));

        assert_eq!(candle.open, candle.close);
        assert_eq!(candle.high, candle.low);
        assert_eq!(candle.key(), CandleKey::new("ETHUSDT", at(10, 0, 0, 0)));
    }

    #[test]
    fn keys_sort_by_bucket_then_symbol() {
        let mut keys = vec![
            CandleKey::new("ETHUSDT", at(10, 1, 0, 0)),
            CandleKey::new("BTCUSDT", at(10, 1, 0, 0)),
            CandleKey::new("ETHUSDT", at(10, 0, 0, 0)),
        ];
        keys.sort();

        assert_eq!(keys[0], CandleKey::new("ETHUSDT", at(10, 0, 0, 0)));
        assert_eq!(keys[1], CandleKey::new("BTCUSDT", at(10, 1, 0, 0)));
    }

    proptest! {
        #[test]
        fn ohlc_invariant_holds_for_any_sequence(prices in prop::collection::vec(1u32..1_000_000, 1..64)) {
            let prices: Vec<Decimal> = prices
                .into_iter()
                .map(|p| Decimal::from_u32(p).unwrap() / Decimal::from(100))
                .collect();
            let mut candle = Candle::new("BTCUSDT", at(10, 0, 0, 0), prices[0]);
            for price in &prices[1..] {
                candle.apply(*price);
            }

            prop_assert!(candle.is_consistent());
            prop_assert_eq!(candle.open, prices[0]);
            prop_assert_eq!(candle.close, *prices.last().unwrap());
            prop_assert_eq!(candle.high, *prices.iter().max().unwrap());
            prop_assert_eq!(candle.low, *prices.iter().min().unwrap());
        }

        #[test]
        fn bucket_contains_its_timestamp(millis in 0i64..4_102_444_800_000, secs in 1u64..3600) {
            let interval = CandleInterval::new(Duration::from_secs(secs)).unwrap();
            let ts = DateTime::from_timestamp_millis(millis).unwrap();
            let start = interval.bucket_start(ts);

            prop_assert!(start <= ts);
            prop_assert!(ts < interval.bucket_end(start));
            prop_assert_eq!(start.timestamp_millis() % interval.as_millis(), 0);
        }
    }
}
