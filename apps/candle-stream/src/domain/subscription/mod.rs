//! Subscription Bookkeeping
//!
//! Domain types for tracking which subscribers want candle updates for
//! which symbols.
//!
//! # Design
//!
//! The subscription book tracks:
//! - Which symbols each subscriber is subscribed to
//! - Which subscribers watch each symbol, so fan-out never scans the
//!   whole subscriber table
//!
//! The book is plain data with no locking; the application registry owns
//! it behind a single mutex together with the delivery handles.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a subscriber. Zero is reserved for "assign one".
pub type SubscriberId = i64;

/// A normalized trading-pair symbol (trimmed, upper-case).
pub type Symbol = String;

/// Errors from subscription validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// Subscriber ID zero is not a valid identity.
    #[error("subscriber id must be non-zero")]
    InvalidSubscriberId,

    /// No usable symbol was supplied.
    #[error("at least one non-empty symbol is required")]
    NoSymbols,
}

/// Normalize a single symbol. Returns `None` for blank input.
#[must_use]
pub fn normalize_symbol(raw: &str) -> Option<Symbol> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_uppercase())
    }
}

/// Normalize a list of symbols, dropping blanks and duplicates.
///
/// # Errors
///
/// Returns [`SubscriptionError::NoSymbols`] if nothing usable remains.
pub fn normalize_symbols<I, S>(raw: I) -> Result<BTreeSet<Symbol>, SubscriptionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let symbols: BTreeSet<Symbol> = raw
        .into_iter()
        .filter_map(|s| normalize_symbol(s.as_ref()))
        .collect();

    if symbols.is_empty() {
        Err(SubscriptionError::NoSymbols)
    } else {
        Ok(symbols)
    }
}

/// Reject the reserved zero identifier.
///
/// # Errors
///
/// Returns [`SubscriptionError::InvalidSubscriberId`] for zero.
pub const fn validate_subscriber_id(id: SubscriberId) -> Result<SubscriberId, SubscriptionError> {
    if id == 0 {
        Err(SubscriptionError::InvalidSubscriberId)
    } else {
        Ok(id)
    }
}

// =============================================================================
// Subscription Book
// =============================================================================

/// Result of removing symbols from a subscriber.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolRemoval {
    /// Symbols that were actually removed.
    pub removed: BTreeSet<Symbol>,
    /// Symbols the subscriber still holds afterwards.
    pub remaining: BTreeSet<Symbol>,
}

/// Subscriber → symbols map plus the inverse symbol → subscribers index.
///
/// Both directions are updated together; a symbol key exists in the index
/// only while at least one subscriber holds it.
#[derive(Debug, Default)]
pub struct SubscriptionBook {
    subscriber_symbols: HashMap<SubscriberId, BTreeSet<Symbol>>,
    symbol_subscribers: HashMap<Symbol, BTreeSet<SubscriberId>>,
}

impl SubscriptionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `symbols` into a subscriber's set, creating it if needed.
    ///
    /// Returns the symbols that were newly added for this subscriber.
    pub fn add(&mut self, subscriber: SubscriberId, symbols: &BTreeSet<Symbol>) -> BTreeSet<Symbol> {
        let set = self.subscriber_symbols.entry(subscriber).or_default();
        let mut added = BTreeSet::new();

        for symbol in symbols {
            if set.insert(symbol.clone()) {
                self.symbol_subscribers
                    .entry(symbol.clone())
                    .or_default()
                    .insert(subscriber);
                added.insert(symbol.clone());
            }
        }

        added
    }

    /// Remove `symbols` from a subscriber. Unknown symbols are ignored.
    ///
    /// The subscriber entry itself is kept even when its set becomes empty;
    /// callers decide whether an empty subscriber should be dropped.
    pub fn remove(&mut self, subscriber: SubscriberId, symbols: &BTreeSet<Symbol>) -> SymbolRemoval {
        let Some(set) = self.subscriber_symbols.get_mut(&subscriber) else {
            return SymbolRemoval::default();
        };

        let mut removed = BTreeSet::new();
        for symbol in symbols {
            if set.remove(symbol) {
                Self::unindex(&mut self.symbol_subscribers, symbol, subscriber);
                removed.insert(symbol.clone());
            }
        }

        SymbolRemoval {
            removed,
            remaining: set.clone(),
        }
    }

    /// Remove a subscriber entirely, returning the symbols it held.
    pub fn remove_subscriber(&mut self, subscriber: SubscriberId) -> Option<BTreeSet<Symbol>> {
        let symbols = self.subscriber_symbols.remove(&subscriber)?;
        for symbol in &symbols {
            Self::unindex(&mut self.symbol_subscribers, symbol, subscriber);
        }
        Some(symbols)
    }

    /// Whether a subscriber is present.
    #[must_use]
    pub fn contains(&self, subscriber: SubscriberId) -> bool {
        self.subscriber_symbols.contains_key(&subscriber)
    }

    /// Symbols held by a subscriber.
    #[must_use]
    pub fn symbols_of(&self, subscriber: SubscriberId) -> Option<&BTreeSet<Symbol>> {
        self.subscriber_symbols.get(&subscriber)
    }

    /// Subscribers whose set contains `symbol`, in ascending ID order.
    pub fn subscribers_for(&self, symbol: &str) -> impl Iterator<Item = SubscriberId> + '_ {
        self.symbol_subscribers
            .get(symbol)
            .into_iter()
            .flatten()
            .copied()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscriber_symbols.len()
    }

    fn unindex(
        index: &mut HashMap<Symbol, BTreeSet<SubscriberId>>,
        symbol: &str,
        subscriber: SubscriberId,
    ) {
        if let Some(ids) = index.get_mut(symbol) {
            ids.remove(&subscriber);
            if ids.is_empty() {
                index.remove(symbol);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn set(symbols: &[&str]) -> BTreeSet<Symbol> {
        symbols.iter().map(|s| (*s).to_string()).collect()
    }

    #[test_case("btcusdt", Some("BTCUSDT") ; "lower case")]
    #[test_case("  EthUsdt ", Some("ETHUSDT") ; "padded mixed case")]
    #[test_case("", None ; "empty")]
    #[test_case("   ", None ; "blank")]
    fn normalize_single_symbol(raw: &str, expected: Option<&str>) {
        assert_eq!(normalize_symbol(raw).as_deref(), expected);
    }

    #[test]
    fn normalize_symbols_dedupes_and_drops_blanks() {
        let symbols = normalize_symbols(["btcusdt", "BTCUSDT", " ", "ethusdt"]).unwrap();
        assert_eq!(symbols, set(&["BTCUSDT", "ETHUSDT"]));
    }

    #[test]
    fn normalize_symbols_rejects_all_blank() {
        assert_eq!(
            normalize_symbols(["", "  "]),
            Err(SubscriptionError::NoSymbols)
        );
        assert_eq!(
            normalize_symbols(Vec::<String>::new()),
            Err(SubscriptionError::NoSymbols)
        );
    }

    #[test]
    fn zero_subscriber_id_is_invalid() {
        assert_eq!(
            validate_subscriber_id(0),
            Err(SubscriptionError::InvalidSubscriberId)
        );
        assert_eq!(validate_subscriber_id(-7), Ok(-7));
    }

    #[test]
    fn add_unions_symbols() {
        let mut book = SubscriptionBook::new();

        let added = book.add(1, &set(&["BTCUSDT"]));
        assert_eq!(added, set(&["BTCUSDT"]));

        let added = book.add(1, &set(&["BTCUSDT", "ETHUSDT"]));
        assert_eq!(added, set(&["ETHUSDT"]));
        assert_eq!(book.symbols_of(1), Some(&set(&["BTCUSDT", "ETHUSDT"])));
        assert_eq!(book.subscriber_count(), 1);
    }

    #[test]
    fn shared_symbol_index_follows_removals() {
        let mut book = SubscriptionBook::new();
        book.add(1, &set(&["BTCUSDT"]));
        book.add(2, &set(&["BTCUSDT"]));
        assert_eq!(book.subscribers_for("BTCUSDT").collect::<Vec<_>>(), vec![1, 2]);

        book.remove(1, &set(&["BTCUSDT"]));
        assert_eq!(book.subscribers_for("BTCUSDT").collect::<Vec<_>>(), vec![2]);

        book.remove(2, &set(&["BTCUSDT"]));
        assert_eq!(book.subscribers_for("BTCUSDT").count(), 0);
        assert!(book.symbol_subscribers.is_empty());
    }

    #[test]
    fn remove_reports_removed_and_remaining() {
        let mut book = SubscriptionBook::new();
        book.add(1, &set(&["BTCUSDT", "ETHUSDT"]));

        let removal = book.remove(1, &set(&["ETHUSDT", "BNBUSDT"]));

        assert_eq!(removal.removed, set(&["ETHUSDT"]));
        assert_eq!(removal.remaining, set(&["BTCUSDT"]));
    }

    #[test]
    fn remove_nonexistent_subscriber_is_noop() {
        let mut book = SubscriptionBook::new();
        let removal = book.remove(42, &set(&["BTCUSDT"]));
        assert_eq!(removal, SymbolRemoval::default());
        assert!(book.remove_subscriber(42).is_none());
    }

    #[test]
    fn remove_subscriber_releases_all_symbols() {
        let mut book = SubscriptionBook::new();
        book.add(1, &set(&["BTCUSDT", "ETHUSDT"]));
        book.add(2, &set(&["ETHUSDT"]));

        let symbols = book.remove_subscriber(1).unwrap();

        assert_eq!(symbols, set(&["BTCUSDT", "ETHUSDT"]));
        assert!(!book.contains(1));
        assert_eq!(book.subscribers_for("BTCUSDT").count(), 0);
        assert_eq!(book.subscribers_for("ETHUSDT").collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn subscribers_for_matches_symbol() {
        let mut book = SubscriptionBook::new();
        book.add(1, &set(&["BTCUSDT"]));
        book.add(2, &set(&["ETHUSDT"]));
        book.add(3, &set(&["BTCUSDT", "ETHUSDT"]));

        assert_eq!(book.subscribers_for("BTCUSDT").collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(book.subscribers_for("SOLUSDT").count(), 0);
    }
}
