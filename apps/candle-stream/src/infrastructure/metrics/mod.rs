//! Prometheus Metrics Module
//!
//! Exposes service metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: ticks received, frames skipped, feed reconnects
//! - **Aggregation**: candle updates, open candles, drain outcomes
//! - **Fan-out**: live subscribers, delivered and dropped updates
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling this again after a successful install returns the same handle.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "candle_stream_ticks_received_total",
        "Total trade ticks decoded from the upstream feed"
    );
    describe_counter!(
        "candle_stream_frames_skipped_total",
        "Total inbound frames skipped because they could not be decoded"
    );
    describe_counter!(
        "candle_stream_reconnects_total",
        "Total upstream feed reconnection attempts"
    );

    describe_counter!(
        "candle_stream_candle_updates_total",
        "Total candle updates produced by the aggregator"
    );
    describe_gauge!(
        "candle_stream_open_candles",
        "Candles currently held in memory"
    );
    describe_counter!(
        "candle_stream_candles_persisted_total",
        "Total candles written to storage"
    );
    describe_counter!(
        "candle_stream_drain_failures_total",
        "Total commit passes stopped by a storage failure"
    );
    describe_histogram!(
        "candle_stream_drain_seconds",
        "Duration of one commit pass"
    );

    describe_gauge!(
        "candle_stream_subscribers",
        "Number of live gRPC subscribers"
    );
    describe_counter!(
        "candle_stream_updates_sent_total",
        "Total candle updates delivered to subscribers"
    );
    describe_counter!(
        "candle_stream_updates_dropped_total",
        "Total candle updates dropped by subscriber outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why an update was not delivered to a subscriber.
#[derive(Debug, Clone, Copy)]
pub enum DropReason {
    /// Subscriber buffer was full.
    SlowConsumer,
    /// Subscriber stream had closed.
    Disconnected,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::SlowConsumer => "slow_consumer",
            Self::Disconnected => "disconnected",
        }
    }
}

/// Record a decoded tick.
pub fn record_tick_received() {
    counter!("candle_stream_ticks_received_total").increment(1);
}

/// Record a frame that failed to decode.
pub fn record_frame_skipped() {
    counter!("candle_stream_frames_skipped_total").increment(1);
}

/// Record a feed reconnection attempt.
pub fn record_reconnect() {
    counter!("candle_stream_reconnects_total").increment(1);
}

/// Record one candle update.
pub fn record_candle_update() {
    counter!("candle_stream_candle_updates_total").increment(1);
}

/// Update the open candle gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_open_candles(count: usize) {
    gauge!("candle_stream_open_candles").set(count as f64);
}

/// Record the outcome of a commit pass.
pub fn record_drain(persisted: usize, failed: bool, duration: Duration) {
    counter!("candle_stream_candles_persisted_total").increment(persisted as u64);
    if failed {
        counter!("candle_stream_drain_failures_total").increment(1);
    }
    histogram!("candle_stream_drain_seconds").record(duration.as_secs_f64());
}

/// Update the live subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("candle_stream_subscribers").set(count as f64);
}

/// Record updates delivered to subscribers.
pub fn record_updates_sent(count: u64) {
    if count > 0 {
        counter!("candle_stream_updates_sent_total").increment(count);
    }
}

/// Record an update that was not delivered.
pub fn record_update_dropped(reason: DropReason) {
    counter!(
        "candle_stream_updates_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

// =============================================================================
// Tests
// =============================================================================
