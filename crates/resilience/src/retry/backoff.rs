//! Backoff strategies for computing inter-attempt delays

use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// How the delay grows with the attempt number.
///
/// For the delay that follows a failed `attempt` (1-based):
///
/// | Strategy | Delay |
/// |----------|-------|
/// | `Fixed` | `base` |
/// | `Linear` | `base × attempt` |
/// | `Exponential` | `base × 2^(attempt−1)` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    #[default]
    Exponential,
}

impl BackoffStrategy {
    /// Delay after `attempt` before any cap is applied.
    ///
    /// Attempt 0 is treated as attempt 1. Arithmetic is exact up to
    /// `Duration::MAX` and saturates there.
    pub fn raw_delay(&self, base: Duration, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed => base,
            Self::Linear => base.saturating_mul(attempt),
            Self::Exponential => doubled(base, attempt - 1),
        }
    }

    /// Delay after `attempt`, capped at `max_delay`.
    pub fn delay(&self, base: Duration, max_delay: Duration, attempt: u32) -> Duration {
        self.raw_delay(base, attempt).min(max_delay)
    }
}

/// `base × 2^exponent`, saturating at `Duration::MAX`.
fn doubled(base: Duration, exponent: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    1_u128
        .checked_shl(exponent)
        .and_then(|factor| base.as_nanos().checked_mul(factor))
        .and_then(|nanos| {
            let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
            let subsec = u32::try_from(nanos % NANOS_PER_SEC).ok()?;
            Some(Duration::new(secs, subsec))
        })
        .unwrap_or(Duration::MAX)
}
