//! Commit Scheduler
//!
//! Drains completed candles to storage once per interval, aligned to
//! interval boundaries (the top of each minute for one-minute candles).
//!
//! Fires run inline in the scheduler loop, so a slow pass can never overlap
//! the next one. Ticks missed during a long pass collapse into one catch-up fire.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregator::{CandleAggregator, DrainError, DrainReport};

/// Source of wall-clock time.
pub type Clock = fn() -> DateTime<Utc>;

/// Periodically commits completed candles.
pub struct CommitScheduler {
    aggregator: Arc<CandleAggregator>,
    cancel: CancellationToken,
    clock: Clock,
}

impl CommitScheduler {
    /// Create a scheduler driven by the system clock.
    #[must_use]
    pub fn new(aggregator: Arc<CandleAggregator>, cancel: CancellationToken) -> Self {
        Self {
            aggregator,
            cancel,
            clock: Utc::now,
        }
    }

    /// Replace the wall clock used for alignment and cutoffs.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Run until cancelled.
    pub async fn run(self) {
        let interval = self.aggregator.interval();
        let delay = interval.delay_until_next_boundary((self.clock)());
        info!(
            first_fire_in_ms = delay.as_millis(),
            interval_ms = interval.as_millis(),
            "Commit scheduler started"
        );

        tokio::select! {
            () = self.cancel.cancelled() => {
                info!("Commit scheduler stopped before first fire");
                return;
            }
            () = tokio::time::sleep(delay) => {}
        }

        let mut ticker = tokio::time::interval(interval.as_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.fire().await.ok();
        }

        info!("Commit scheduler stopped");
    }

    /// Run one commit pass for every bucket that has closed by now.
    ///
    /// # Errors
    ///
    /// Returns the drain error after logging it.
    pub async fn fire(&self) -> Result<DrainReport, DrainError> {
        let interval = self.aggregator.interval();
        let cutoff = interval.bucket_start((self.clock)());
        let started = Instant::now();

        let result = self.aggregator.drain_completed_candles(cutoff).await;
        match &result {
            Ok(report) => debug!(
                persisted = report.persisted,
                retained = report.retained,
                "Commit pass finished"
            ),
            Err(e) => error!(error = %e, "Commit pass failed; remaining candles retried next interval"),
        }

        let elapsed = started.elapsed();
        if elapsed >= interval.as_duration() {
            warn!(
                elapsed_ms = elapsed.as_millis(),
                interval_ms = interval.as_millis(),
                "Commit pass overran its interval; missed fires collapse into one"
            );
        }
        result
    }
}

// =============================================================================
// Tests
// =============================================================================
