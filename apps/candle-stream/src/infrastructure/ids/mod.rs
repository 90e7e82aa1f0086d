//! Subscriber ID generators.
//!
//! Production IDs are snowflakes: a 63-bit value made of
//!
//! ```text
//! | 41 bits: ms since epoch | 10 bits: node | 12 bits: sequence |
//! ```
//!
//! with the Twitter epoch (`2010-11-04T01:42:54.657Z`). Dev mode uses a
//! plain counter so IDs are short and predictable.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;

use crate::application::ports::{IdError, SubscriberIdGenerator};
use crate::domain::subscription::SubscriberId;

/// Custom epoch in Unix milliseconds.
pub const SNOWFLAKE_EPOCH_MS: i64 = 1_288_834_974_657;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

/// Highest node number.
pub const MAX_NODE: i64 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;
const TIME_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;

#[derive(Debug, Default)]
struct SnowflakeState {
    /// Timestamp component of the last ID; may run ahead of the clock.
    last_ms: i64,
    /// Last clock reading.
    last_clock_ms: i64,
    sequence: i64,
}

/// Time-ordered unique IDs for one node.
#[derive(Debug)]
pub struct SnowflakeIdGenerator {
    node: i64,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeIdGenerator {
    /// Create a generator for `node` (0..=1023).
    ///
    /// # Errors
    ///
    /// Returns [`IdError::InvalidNode`] if `node` is out of range.
    pub fn new(node: i64) -> Result<Self, IdError> {
        if !(0..=MAX_NODE).contains(&node) {
            return Err(IdError::InvalidNode {
                node,
                max: MAX_NODE,
            });
        }
        Ok(Self {
            node,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    /// Node number baked into every ID.
    #[must_use]
    pub const fn node(&self) -> i64 {
        self.node
    }

    fn generate_at(&self, now_ms: i64) -> Result<SubscriberId, IdError> {
        let mut state = self.state.lock();
        let clock = now_ms - SNOWFLAKE_EPOCH_MS;

        if clock < state.last_clock_ms {
            return Err(IdError::ClockMovedBackwards(state.last_clock_ms - clock));
        }
        state.last_clock_ms = clock;

        let mut now = clock.max(state.last_ms);
        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond; borrow the next one.
                now = state.last_ms + 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        Ok((now << TIME_SHIFT) | (self.node << SEQUENCE_BITS) | state.sequence)
    }
}

impl SubscriberIdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> Result<SubscriberId, IdError> {
        self.generate_at(Utc::now().timestamp_millis())
    }
}

/// Counter starting at 1. For dev mode.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    last: AtomicI64,
}

impl SequentialIdGenerator {
    /// Create a counter whose first ID is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: AtomicI64::new(0),
        }
    }
}

impl SubscriberIdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> Result<SubscriberId, IdError> {
        Ok(self.last.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use test_case::test_case;

    const T0: i64 = SNOWFLAKE_EPOCH_MS + 1_000_000;

    #[test_case(-1 ; "negative")]
    #[test_case(1024 ; "too large")]
    fn rejects_out_of_range_node(node: i64) {
        assert_eq!(
            SnowflakeIdGenerator::new(node).unwrap_err(),
            IdError::InvalidNode { node, max: 1023 }
        );
    }

    #[test]
    fn id_layout() {
        let generator = SnowflakeIdGenerator::new(5).unwrap();

        let id = generator.generate_at(T0).unwrap();

        assert_eq!(id >> TIME_SHIFT, 1_000_000);
        assert_eq!((id >> SEQUENCE_BITS) & MAX_NODE, 5);
        assert_eq!(id & MAX_SEQUENCE, 0);
        assert!(id > 0);
    }

    #[test]
    fn same_millisecond_increments_sequence() {
        let generator = SnowflakeIdGenerator::new(1).unwrap();

        let a = generator.generate_at(T0).unwrap();
        let b = generator.generate_at(T0).unwrap();

        assert_eq!(b - a, 1);
    }

    #[test]
    fn sequence_overflow_moves_to_next_millisecond() {
        let generator = SnowflakeIdGenerator::new(1).unwrap();
        let ids: Vec<i64> = (0..=MAX_SEQUENCE + 1)
            .map(|_| generator.generate_at(T0).unwrap())
            .collect();

        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids.last().unwrap() >> TIME_SHIFT, 1_000_001);
    }

    #[test]
    fn clock_moving_backwards_is_an_error() {
        let generator = SnowflakeIdGenerator::new(1).unwrap();
        generator.generate_at(T0).unwrap();

        assert_eq!(
            generator.generate_at(T0 - 3),
            Err(IdError::ClockMovedBackwards(3))
        );
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let generator = Arc::new(SnowflakeIdGenerator::new(7).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || {
                    (0..1000)
                        .map(|_| generator.next_id().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let ids: HashSet<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 4000);
    }

    #[test]
    fn sequential_starts_at_one() {
        let generator = SequentialIdGenerator::new();
        assert_eq!(generator.next_id(), Ok(1));
        assert_eq!(generator.next_id(), Ok(2));
        assert_eq!(generator.next_id(), Ok(3));
    }
}
