//! Reconnection Policy
//!
//! Capped exponential backoff for the trade feed. The defaults retry after
//! 2s, 4s, 8s, 10s and 10s, then give up.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%). Zero disables it.
    pub jitter_factor: f64,
    /// Retries allowed per outage (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

/// Backoff state for one outage. Reset after every successful connect.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.apply_jitter(self.base_delay(self.attempt_count)))
    }

    /// Forget past attempts after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Attempts made in the current outage.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// `initial * multiplier^(attempt - 1)`, capped at `max_delay`.
    fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let scaled = self.config.initial_delay.as_secs_f64() * factor;

        if scaled.is_finite() && scaled < self.config.max_delay.as_secs_f64() {
            Duration::from_secs_f64(scaled)
        } else {
            self.config.max_delay
        }
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        let base = duration.as_secs_f64();
        let range = base * self.config.jitter_factor;
        if !range.is_finite() || range <= 0.0 {
            return duration;
        }
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((base + jitter).max(0.001))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delays(policy: &mut ReconnectPolicy) -> Vec<u64> {
        std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_secs())
            .take(20)
            .collect()
    }

    #[test]
    fn default_schedule_is_capped_and_bounded() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        assert_eq!(delays(&mut policy), vec![2, 4, 8, 10, 10]);
        assert!(!policy.should_retry());
        assert_eq!(policy.attempt_count(), 5);
    }

    #[test]
    fn delays_never_decrease() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(7),
            multiplier: 1.7,
            jitter_factor: 0.0,
            max_attempts: 12,
        });
        let all: Vec<_> = std::iter::from_fn(|| policy.next_delay()).collect();

        assert_eq!(all.len(), 12);
        assert!(all.windows(2).all(|w| w[0] <= w[1]));
        assert!(all.iter().all(|d| *d <= Duration::from_secs(7)));
    }

    #[test]
    fn reset_starts_over() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let _ = policy.next_delay();
        let _ = policy.next_delay();

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_secs(1),
                jitter_factor: 0.1,
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[test]
    fn non_finite_jitter_keeps_base_delay() {
        for jitter_factor in [f64::NAN, f64::INFINITY] {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor,
                ..ReconnectConfig::default()
            });
            assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
            assert_eq!(policy.next_delay(), Some(Duration::from_secs(4)));
        }
    }

    #[test]
    fn unlimited_attempts_keep_retrying() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        });
        for _ in 0..1000 {
            assert_eq!(policy.next_delay().map(|d| d <= Duration::from_secs(10)), Some(true));
        }
    }
}
