//! Jitter for spreading retries from many callers apart
//!
//! A [`JitterCalculator`] is created fresh for every retry sequence. Only the
//! decorrelated mode keeps state (the previous delay), and that state must
//! not leak between unrelated executions.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Randomization applied to a computed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum JitterMode {
    /// Delay used as computed
    None,
    /// Uniform in `[0, delay]`
    Full,
    /// `delay/2` plus uniform in `[0, delay/2]`
    #[default]
    Equal,
    /// `min(cap, uniform(base, previous × 3))`, starting from `previous = base`
    Decorrelated,
}

/// Per-sequence jitter state.
#[derive(Debug)]
pub struct JitterCalculator {
    mode: JitterMode,
    base: Duration,
    cap: Duration,
    previous: Duration,
    rng: StdRng,
}

impl JitterCalculator {
    /// Calculator for one retry sequence.
    ///
    /// `base` and `cap` only matter for [`JitterMode::Decorrelated`].
    pub fn new(mode: JitterMode, base: Duration, cap: Duration) -> Self {
        Self::with_rng(mode, base, cap, StdRng::from_entropy())
    }

    /// Deterministic calculator for tests and simulations.
    pub fn with_seed(mode: JitterMode, base: Duration, cap: Duration, seed: u64) -> Self {
        Self::with_rng(mode, base, cap, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mode: JitterMode, base: Duration, cap: Duration, rng: StdRng) -> Self {
        Self { mode, base, cap, previous: base, rng }
    }

    pub fn mode(&self) -> JitterMode {
        self.mode
    }

    /// Randomize `delay`.
    ///
    /// None/Full/Equal return a value in `[0, delay]`; Decorrelated ignores
    /// `delay` and returns a value in `[base, cap]` (given `base ≤ cap`).
    pub fn apply(&mut self, delay: Duration) -> Duration {
        let jittered = match self.mode {
            JitterMode::None => delay,
            JitterMode::Full => self.uniform(Duration::ZERO, delay),
            JitterMode::Equal => {
                let half = delay / 2;
                half + self.uniform(Duration::ZERO, delay - half)
            }
            JitterMode::Decorrelated => {
                let upper = self.previous.saturating_mul(3).max(self.base);
                self.uniform(self.base, upper).min(self.cap)
            }
        };
        self.previous = jittered;
        jittered
    }

    /// Record a delay chosen outside the calculator (a retry-after hint) so
    /// decorrelated jitter continues from it.
    pub fn observe(&mut self, delay: Duration) {
        self.previous = delay;
    }

    fn uniform(&mut self, low: Duration, high: Duration) -> Duration {
        let low = duration_nanos(low);
        let high = duration_nanos(high);
        if high <= low {
            return Duration::from_nanos(low);
        }
        Duration::from_nanos(self.rng.gen_range(low..=high))
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(100);
    const CAP: Duration = Duration::from_secs(10);

    fn calculator(mode: JitterMode, seed: u64) -> JitterCalculator {
        JitterCalculator::with_seed(mode, BASE, CAP, seed)
    }

    #[test]
    fn test_none_returns_input() {
        let mut jitter = calculator(JitterMode::None, 1);
        assert_eq!(jitter.apply(Duration::from_millis(750)), Duration::from_millis(750));
    }

    #[test]
    fn test_full_jitter_stays_within_delay() {
        let delay = Duration::from_millis(500);
        let mut jitter = calculator(JitterMode::Full, 7);
        for _ in 0..1_000 {
            assert!(jitter.apply(delay) <= delay);
        }
    }

    /// Equal jitter never drops below half of the delay nor exceeds it.
    #[test]
    fn test_equal_jitter_keeps_floor() {
        let mut jitter = calculator(JitterMode::Equal, 42);
        for millis in [1_u64, 3, 99, 100, 1_001, 30_000] {
            let delay = Duration::from_millis(millis);
            for _ in 0..200 {
                let value = jitter.apply(delay);
                assert!(value >= delay / 2, "{value:?} below floor for {delay:?}");
                assert!(value <= delay, "{value:?} above {delay:?}");
            }
        }
    }

    #[test]
    fn test_zero_delay_is_zero_for_stateless_modes() {
        for mode in [JitterMode::None, JitterMode::Full, JitterMode::Equal] {
            assert_eq!(calculator(mode, 3).apply(Duration::ZERO), Duration::ZERO);
        }
    }

    #[test]
    fn test_decorrelated_stays_between_base_and_cap() {
        let mut jitter = calculator(JitterMode::Decorrelated, 9);
        let mut previous = BASE;
        for _ in 0..500 {
            let value = jitter.apply(Duration::ZERO);
            assert!(value >= BASE);
            assert!(value <= CAP);
            assert!(value <= previous.saturating_mul(3).max(BASE));
            previous = value;
        }
    }

    #[test]
    fn test_decorrelated_state_is_per_instance() {
        let mut first = calculator(JitterMode::Decorrelated, 11);
        for _ in 0..20 {
            first.apply(Duration::ZERO);
        }

        // A fresh calculator starts again from `base`, so its first value is
        // bounded by 3 × base no matter what the other instance did.
        let mut fresh = calculator(JitterMode::Decorrelated, 12);
        assert!(fresh.apply(Duration::ZERO) <= BASE * 3);
    }

    #[test]
    fn test_observe_feeds_decorrelated_state() {
        let mut jitter = calculator(JitterMode::Decorrelated, 5);
        jitter.observe(Duration::from_secs(2));
        let value = jitter.apply(Duration::ZERO);
        assert!(value >= BASE);
        assert!(value <= Duration::from_secs(6));
    }

    #[test]
    fn test_seeded_calculators_are_deterministic() {
        let mut a = calculator(JitterMode::Full, 99);
        let mut b = calculator(JitterMode::Full, 99);
        for _ in 0..10 {
            assert_eq!(a.apply(Duration::from_secs(1)), b.apply(Duration::from_secs(1)));
        }
    }
}
