//! Subscription / Broadcast Registry
//!
//! Tracks live subscribers and fans candle updates out to the ones whose
//! symbol set contains the update's symbol.
//!
//! Every operation takes the registry lock once, only for the map access.
//! Sends happen after the lock is released and each subscriber is handled
//! independently: a full or closed sink affects only that subscriber.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{CandlePublisher, CandleSink, SinkError};
use crate::domain::candle::Candle;
use crate::domain::subscription::{
    SubscriberId, SubscriptionBook, SubscriptionError, Symbol, normalize_symbols,
    validate_subscriber_id,
};
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Types
// =============================================================================

/// Registry validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Request failed validation; nothing was changed.
    #[error(transparent)]
    Invalid(#[from] SubscriptionError),
}

/// Result of a subscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new subscriber was registered with these symbols.
    Created {
        /// Normalized symbol set.
        symbols: BTreeSet<Symbol>,
    },
    /// The subscriber already existed; symbols were merged in.
    Extended {
        /// Symbols that were not already subscribed.
        added: BTreeSet<Symbol>,
    },
}

/// Result of an unsubscribe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// The subscriber was removed and its stream cancelled.
    Removed {
        /// Symbols it held when removed.
        symbols: BTreeSet<Symbol>,
    },
    /// Some symbols were removed; the subscriber stays live.
    SymbolsRemoved {
        /// Symbols actually removed.
        removed: BTreeSet<Symbol>,
        /// Symbols still subscribed.
        remaining: BTreeSet<Symbol>,
    },
    /// No such subscriber.
    NotFound,
}

/// Delivery summary for one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers that accepted the update.
    pub delivered: usize,
    /// Subscribers whose buffer was full.
    pub dropped: usize,
    /// Subscribers removed because their stream closed.
    pub removed: usize,
}

struct SubscriberHandle {
    sink: Arc<dyn CandleSink>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RegistryState {
    book: SubscriptionBook,
    handles: HashMap<SubscriberId, SubscriberHandle>,
}

impl RegistryState {
    fn remove(&mut self, id: SubscriberId) -> Option<(BTreeSet<Symbol>, CancellationToken)> {
        let handle = self.handles.remove(&id)?;
        let symbols = self.book.remove_subscriber(id).unwrap_or_default();
        Some((symbols, handle.cancel))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Owns the subscriber map and delivers candle updates.
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, or merge symbols into an existing one.
    ///
    /// For an existing subscriber the original sink and cancellation token
    /// are kept; `sink` and `cancel` from this call are dropped.
    ///
    /// # Errors
    ///
    /// Rejects a zero ID or a blank symbol set without changing anything.
    pub fn subscribe<I, S>(
        &self,
        id: SubscriberId,
        symbols: I,
        sink: Arc<dyn CandleSink>,
        cancel: CancellationToken,
    ) -> Result<SubscribeOutcome, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = validate_subscriber_id(id)?;
        let symbols = normalize_symbols(symbols)?;

        let (outcome, count) = {
            let mut state = self.state.lock();
            let outcome = if state.handles.contains_key(&id) {
                let added = state.book.add(id, &symbols);
                SubscribeOutcome::Extended { added }
            } else {
                state.book.add(id, &symbols);
                state.handles.insert(id, SubscriberHandle { sink, cancel });
                SubscribeOutcome::Created { symbols }
            };
            (outcome, state.handles.len())
        };

        metrics::set_subscribers(count);
        match &outcome {
            SubscribeOutcome::Created { symbols } => {
                info!(subscriber_id = id, ?symbols, "Subscriber registered");
            }
            SubscribeOutcome::Extended { added } => {
                debug!(subscriber_id = id, ?added, "Subscriber symbols extended");
            }
        }
        Ok(outcome)
    }

    /// Remove symbols from a subscriber, or the whole subscriber.
    ///
    /// An empty `symbols` list removes the subscriber. Removing its last
    /// symbol removes it too. Removal cancels the subscriber's token.
    pub fn unsubscribe<I, S>(&self, id: SubscriberId, symbols: I) -> UnsubscribeOutcome
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let requested = normalize_symbols(symbols).ok();

        let (outcome, cancel, count) = {
            let mut state = self.state.lock();
            if !state.handles.contains_key(&id) {
                drop(state);
                info!(subscriber_id = id, "Unsubscribe for unknown subscriber ignored");
                return UnsubscribeOutcome::NotFound;
            }

            let (outcome, cancel) = match requested {
                None => match state.remove(id) {
                    Some((symbols, cancel)) => (UnsubscribeOutcome::Removed { symbols }, Some(cancel)),
                    None => (UnsubscribeOutcome::NotFound, None),
                },
                Some(requested) => {
                    let removal = state.book.remove(id, &requested);
                    if removal.remaining.is_empty() {
                        let cancel = state.remove(id).map(|(_, cancel)| cancel);
                        (
                            UnsubscribeOutcome::Removed {
                                symbols: removal.removed,
                            },
                            cancel,
                        )
                    } else {
                        (
                            UnsubscribeOutcome::SymbolsRemoved {
                                removed: removal.removed,
                                remaining: removal.remaining,
                            },
                            None,
                        )
                    }
                }
            };
            (outcome, cancel, state.handles.len())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
            info!(subscriber_id = id, "Subscriber removed");
        }
        metrics::set_subscribers(count);
        outcome
    }

    /// Deliver an update to every subscriber watching its symbol.
    ///
    /// Never blocks on a subscriber. Full buffers drop this update for that
    /// subscriber only; closed streams get their subscriber removed.
    pub fn publish_candle(&self, candle: &Candle) -> PublishReport {
        let targets: Vec<(SubscriberId, Arc<dyn CandleSink>)> = {
            let state = self.state.lock();
            state
                .book
                .subscribers_for(&candle.symbol)
                .filter_map(|id| state.handles.get(&id).map(|h| (id, Arc::clone(&h.sink))))
                .collect()
        };

        let mut report = PublishReport::default();
        let mut closed = Vec::new();
        for (id, sink) in targets {
            match sink.try_send(candle) {
                Ok(()) => report.delivered += 1,
                Err(SinkError::Full) => {
                    report.dropped += 1;
                    metrics::record_update_dropped(DropReason::SlowConsumer);
                    warn!(subscriber_id = id, symbol = %candle.symbol, "Subscriber lagging; update dropped");
                }
                Err(SinkError::Closed) => {
                    metrics::record_update_dropped(DropReason::Disconnected);
                    closed.push((id, sink));
                }
            }
        }
        metrics::record_updates_sent(report.delivered as u64);

        if !closed.is_empty() {
            report.removed = self.remove_closed(closed);
        }
        report
    }

    /// Remove a subscriber whose stream ended. No-op if the ID is gone or now
    /// belongs to another sink.
    pub fn release(&self, id: SubscriberId, sink: &Arc<dyn CandleSink>) -> bool {
        self.remove_closed(vec![(id, Arc::clone(sink))]) == 1
    }

    /// Remove subscribers whose sink reported closed, unless the ID was
    /// re-registered with a different sink in the meantime.
    fn remove_closed(&self, closed: Vec<(SubscriberId, Arc<dyn CandleSink>)>) -> usize {
        let (cancelled, count) = {
            let mut state = self.state.lock();
            let mut cancelled = Vec::with_capacity(closed.len());
            for (id, sink) in closed {
                let same_sink = state
                    .handles
                    .get(&id)
                    .is_some_and(|h| Arc::ptr_eq(&h.sink, &sink));
                if !same_sink {
                    continue;
                }
                if let Some((_, cancel)) = state.remove(id) {
                    cancelled.push((id, cancel));
                }
            }
            (cancelled, state.handles.len())
        };

        for (id, cancel) in &cancelled {
            cancel.cancel();
            warn!(subscriber_id = id, "Subscriber stream closed; removed");
        }
        metrics::set_subscribers(count);
        cancelled.len()
    }

    /// Whether a subscriber is registered.
    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.state.lock().handles.contains_key(&id)
    }

    /// Symbols a subscriber currently holds.
    #[must_use]
    pub fn subscriber_symbols(&self, id: SubscriberId) -> Option<BTreeSet<Symbol>> {
        self.state.lock().book.symbols_of(id).cloned()
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    /// Remove and cancel every subscriber.
    pub fn shutdown(&self) {
        let cancelled: Vec<CancellationToken> = {
            let mut state = self.state.lock();
            state.book = SubscriptionBook::new();
            state.handles.drain().map(|(_, h)| h.cancel).collect()
        };
        for cancel in &cancelled {
            cancel.cancel();
        }
        metrics::set_subscribers(0);
        if !cancelled.is_empty() {
            info!(count = cancelled.len(), "All subscribers cancelled");
        }
    }
}

impl CandlePublisher for SubscriptionRegistry {
    fn publish(&self, candle: &Candle) {
        self.publish_candle(candle);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct TestSink {
        received: Mutex<Vec<Candle>>,
        full: AtomicBool,
        closed: AtomicBool,
    }

    impl TestSink {
        fn symbols(&self) -> Vec<String> {
            self.received.lock().iter().map(|c| c.symbol.clone()).collect()
        }
    }

    impl CandleSink for TestSink {
        fn try_send(&self, candle: &Candle) -> Result<(), SinkError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SinkError::Closed);
            }
            if self.full.load(Ordering::SeqCst) {
                return Err(SinkError::Full);
            }
            self.received.lock().push(candle.clone());
            Ok(())
        }
    }

    fn candle(symbol: &str) -> Candle {
        Candle::new(
            symbol,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            Decimal::new(100, 0),
        )
    }

    fn register(registry: &SubscriptionRegistry, id: SubscriberId, symbols: &[&str]) -> (Arc<TestSink>, CancellationToken) {
        let sink = Arc::new(TestSink::default());
        let cancel = CancellationToken::new();
        registry
            .subscribe(id, symbols.iter().copied(), sink.clone(), cancel.clone())
            .unwrap();
        (sink, cancel)
    }

    #[test]
    fn delivers_only_matching_symbols() {
        let registry = SubscriptionRegistry::new();
        let (sink, _) = register(&registry, 1, &["BTCUSD", "ETHUSD"]);

        registry.publish_candle(&candle("ETHUSD"));
        registry.publish_candle(&candle("XRPUSD"));

        assert_eq!(sink.symbols(), vec!["ETHUSD"]);
    }

    #[test]
    fn subscribe_normalizes_symbols() {
        let registry = SubscriptionRegistry::new();
        let (sink, _) = register(&registry, 1, &[" btcusd "]);

        registry.publish_candle(&candle("BTCUSD"));

        assert_eq!(sink.symbols(), vec!["BTCUSD"]);
    }

    #[test]
    fn subscribe_rejects_invalid_requests() {
        let registry = SubscriptionRegistry::new();
        let sink: Arc<dyn CandleSink> = Arc::new(TestSink::default());

        let zero = registry.subscribe(0, ["BTCUSD"], sink.clone(), CancellationToken::new());
        let empty = registry.subscribe(1, ["", " "], sink, CancellationToken::new());

        assert_eq!(zero, Err(RegistryError::Invalid(SubscriptionError::InvalidSubscriberId)));
        assert_eq!(empty, Err(RegistryError::Invalid(SubscriptionError::NoSymbols)));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn resubscribe_unions_and_keeps_original_sink() {
        let registry = SubscriptionRegistry::new();
        let (original, _) = register(&registry, 1, &["BTCUSD"]);
        let replacement = Arc::new(TestSink::default());

        let outcome = registry
            .subscribe(1, ["ETHUSD", "BTCUSD"], replacement.clone(), CancellationToken::new())
            .unwrap();

        assert_eq!(
            outcome,
            SubscribeOutcome::Extended {
                added: BTreeSet::from(["ETHUSD".to_string()])
            }
        );
        registry.publish_candle(&candle("ETHUSD"));
        assert_eq!(original.symbols(), vec!["ETHUSD"]);
        assert!(replacement.symbols().is_empty());
    }

    #[test]
    fn unsubscribe_symbol_stops_only_that_symbol() {
        let registry = SubscriptionRegistry::new();
        let (sink, cancel) = register(&registry, 1, &["BTCUSD", "ETHUSD"]);

        let outcome = registry.unsubscribe(1, ["BTCUSD"]);
        registry.publish_candle(&candle("BTCUSD"));
        registry.publish_candle(&candle("ETHUSD"));

        assert!(matches!(outcome, UnsubscribeOutcome::SymbolsRemoved { .. }));
        assert_eq!(sink.symbols(), vec!["ETHUSD"]);
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn unsubscribe_last_symbol_removes_subscriber() {
        let registry = SubscriptionRegistry::new();
        let (_, cancel) = register(&registry, 1, &["BTCUSD"]);

        let outcome = registry.unsubscribe(1, ["btcusd"]);

        assert_eq!(
            outcome,
            UnsubscribeOutcome::Removed {
                symbols: BTreeSet::from(["BTCUSD".to_string()])
            }
        );
        assert!(cancel.is_cancelled());
        assert!(!registry.contains(1));
    }

    #[test]
    fn unsubscribe_all_removes_and_cancels() {
        let registry = SubscriptionRegistry::new();
        let (sink, cancel) = register(&registry, 1, &["BTCUSD", "ETHUSD"]);

        let outcome = registry.unsubscribe(1, Vec::<String>::new());
        registry.publish_candle(&candle("BTCUSD"));

        assert!(matches!(outcome, UnsubscribeOutcome::Removed { .. }));
        assert!(cancel.is_cancelled());
        assert!(sink.symbols().is_empty());
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_unknown_is_noop() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.unsubscribe(99, ["BTCUSD"]), UnsubscribeOutcome::NotFound);
    }

    #[test]
    fn closed_sink_is_removed_without_affecting_others() {
        let registry = SubscriptionRegistry::new();
        let (first, first_cancel) = register(&registry, 1, &["BTCUSD"]);
        let (second, _) = register(&registry, 2, &["BTCUSD"]);
        let (third, _) = register(&registry, 3, &["BTCUSD"]);
        first.closed.store(true, Ordering::SeqCst);

        let report = registry.publish_candle(&candle("BTCUSD"));

        assert_eq!(report, PublishReport { delivered: 2, dropped: 0, removed: 1 });
        assert!(first_cancel.is_cancelled());
        assert!(!registry.contains(1));
        assert_eq!(second.symbols(), vec!["BTCUSD"]);
        assert_eq!(third.symbols(), vec!["BTCUSD"]);
    }

    #[test]
    fn full_sink_drops_update_but_stays_registered() {
        let registry = SubscriptionRegistry::new();
        let (slow, cancel) = register(&registry, 1, &["BTCUSD"]);
        let (fast, _) = register(&registry, 2, &["BTCUSD"]);
        slow.full.store(true, Ordering::SeqCst);

        let report = registry.publish_candle(&candle("BTCUSD"));

        assert_eq!(report, PublishReport { delivered: 1, dropped: 1, removed: 0 });
        assert!(registry.contains(1));
        assert!(!cancel.is_cancelled());
        assert_eq!(fast.symbols(), vec!["BTCUSD"]);

        slow.full.store(false, Ordering::SeqCst);
        registry.publish_candle(&candle("BTCUSD"));
        assert_eq!(slow.symbols(), vec!["BTCUSD"]);
    }

    #[test]
    fn shutdown_cancels_everyone() {
        let registry = SubscriptionRegistry::new();
        let (_, a) = register(&registry, 1, &["BTCUSD"]);
        let (_, b) = register(&registry, 2, &["ETHUSD"]);

        registry.shutdown();

        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(registry.subscriber_count(), 0);
        assert_eq!(registry.subscriber_symbols(1), None);
    }

    #[test]
    fn release_only_removes_matching_sink() {
        let registry = SubscriptionRegistry::new();
        let (_, cancel) = register(&registry, 1, &["BTCUSD"]);
        let stranger: Arc<dyn CandleSink> = Arc::new(TestSink::default());

        assert!(!registry.release(1, &stranger));
        assert!(registry.contains(1));

        registry.unsubscribe(1, Vec::<String>::new());
        let sink: Arc<dyn CandleSink> = Arc::new(TestSink::default());
        registry
            .subscribe(1, ["ETHUSD"], Arc::clone(&sink), CancellationToken::new())
            .unwrap();

        assert!(cancel.is_cancelled());
        assert!(registry.release(1, &sink));
        assert!(!registry.contains(1));
    }
}
