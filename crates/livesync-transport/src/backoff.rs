//! Reconnect backoff
//!
//! Exponential growth from `initial_delay`, capped at `max_delay`, with
//! optional ±25 % random jitter. Retries never run out; the connector stops
//! only on shutdown.

use rand::Rng;
use std::time::Duration;

/// Jitter amplitude as a fraction of the delay
const JITTER: f64 = 0.25;

/// Reconnect timing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// First delay after a failure
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
    /// Randomize each delay by ±25 %
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Set first delay
    #[inline]
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set delay cap
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set growth factor; values below 1.0 are raised to 1.0
    #[inline]
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() {
            multiplier.max(1.0)
        } else {
            1.0
        };
        self
    }

    /// Enable or disable jitter
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Backoff state for one connection
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
    current: Duration,
}

impl Backoff {
    /// Fresh state
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            attempt: 0,
            current: policy.initial_delay.min(policy.max_delay),
            policy,
        }
    }

    /// Consecutive failures since the last reset
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Back to the initial delay after a successful open
    pub fn reset(&mut self) {
        if self.attempt > 0 {
            tracing::debug!(attempts = self.attempt, "backoff reset");
        }
        self.attempt = 0;
        self.current = self.policy.initial_delay.min(self.policy.max_delay);
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);

        let base = self.current;
        self.current = base
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_delay);

        if self.policy.jitter {
            let factor = rand::rng().random_range((1.0 - JITTER)..=(1.0 + JITTER));
            base.mul_f64(factor).min(self.policy.max_delay)
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn plain() -> ReconnectPolicy {
        ReconnectPolicy::default()
            .with_initial_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(1))
            .with_jitter(false)
    }

    #[test]
    fn grows_and_caps() {
        let mut b = Backoff::new(plain());
        let delays: Vec<u64> = (0..6)
            .map(|_| u64::try_from(b.next_delay().as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(b.attempt(), 6);
    }

    #[test]
    fn reset_restarts() {
        let mut b = Backoff::new(plain());
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_in_band() {
        let policy = plain().with_jitter(true);
        for _ in 0..200 {
            let d = Backoff::new(policy).next_delay();
            assert!(d >= Duration::from_millis(75), "{d:?}");
            assert!(d <= Duration::from_millis(125), "{d:?}");
        }
    }

    #[test]
    fn defaults() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.initial_delay, Duration::from_millis(500));
        assert_eq!(p.max_delay, Duration::from_secs(30));
        assert!(p.jitter);
        assert!((p.with_multiplier(0.5).multiplier - 1.0).abs() < f64::EPSILON);
    }
}
