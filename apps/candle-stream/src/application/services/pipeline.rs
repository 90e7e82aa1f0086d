//! Tick consumer loop.
//!
//! Single consumer of the feed channel: ticks are applied in the order the
//! adapter produced them, one at a time.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::aggregator::CandleAggregator;
use crate::application::ports::FeedEvent;
use crate::infrastructure::metrics;

/// Apply feed events to the aggregator until cancelled or the channel
/// closes. Ticks already queued when cancellation arrives are still
/// applied. Returns the number of ticks applied.
pub async fn consume_feed_events(
    mut rx: mpsc::Receiver<FeedEvent>,
    aggregator: Arc<CandleAggregator>,
    cancel: CancellationToken,
) -> u64 {
    let mut applied = 0;

    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => {
                    info!("Feed channel closed");
                    return applied;
                }
            },
        };
        applied += handle_event(event, &aggregator);
    }

    rx.close();
    while let Ok(event) = rx.try_recv() {
        applied += handle_event(event, &aggregator);
    }
    info!(applied, "Tick consumer stopped");
    applied
}

fn handle_event(event: FeedEvent, aggregator: &CandleAggregator) -> u64 {
    match event {
        FeedEvent::Trade(tick) => {
            metrics::record_tick_received();
            match aggregator.apply_tick(&tick) {
                Ok(_) => return 1,
                Err(e) => warn!(error = %e, ?tick, "Tick rejected"),
            }
        }
        FeedEvent::Connected => info!("Trade feed connected"),
        FeedEvent::Disconnected => warn!("Trade feed disconnected"),
        FeedEvent::Reconnecting { attempt, delay } => {
            debug!(attempt, delay_ms = delay.as_millis(), "Trade feed reconnecting");
        }
        FeedEvent::Error(msg) => error!(error = %msg, "Trade feed error"),
    }
    0
}
