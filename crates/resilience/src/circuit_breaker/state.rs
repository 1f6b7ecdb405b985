//! Breaker states and their transitions
//!
//! Transitions are pure functions over [`BreakerState`]; the breaker applies
//! them while holding its lock, so each read-modify-transition happens as one
//! step.

use std::fmt;
use std::time::{Duration, Instant};

use crate::circuit_breaker::config::CircuitBreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "SCREAMING_SNAKE_CASE"))]
pub enum CircuitState {
    /// Calls flow through; consecutive failures are counted
    Closed,
    /// Calls are rejected until `open_duration` has elapsed
    Open,
    /// A limited number of probe calls test whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// State together with the data that only exists in that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen { admitted: u32, successes: u32 },
}

/// Answer to a permit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    Admit { probe: bool },
    Reject { retry_in: Option<Duration> },
}

impl BreakerState {
    pub(crate) const CLOSED: Self = Self::Closed { consecutive_failures: 0 };

    pub(crate) fn public(&self) -> CircuitState {
        match self {
            Self::Closed { .. } => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Decide admission. Open moves to HalfOpen here, lazily, once
    /// `open_duration` has passed.
    pub(crate) fn on_permit(self, now: Instant, config: &CircuitBreakerConfig) -> (Self, Gate) {
        match self {
            Self::Closed { .. } => (self, Gate::Admit { probe: false }),
            Self::Open { since } => {
                let elapsed = now.saturating_duration_since(since);
                if elapsed >= config.open_duration {
                    (Self::HalfOpen { admitted: 1, successes: 0 }, Gate::Admit { probe: true })
                } else {
                    (self, Gate::Reject { retry_in: Some(config.open_duration - elapsed) })
                }
            }
            Self::HalfOpen { admitted, successes } => {
                if admitted < config.half_open_max_probes {
                    (Self::HalfOpen { admitted: admitted + 1, successes }, Gate::Admit { probe: true })
                } else {
                    (self, Gate::Reject { retry_in: None })
                }
            }
        }
    }

    pub(crate) fn on_success(self, config: &CircuitBreakerConfig) -> Self {
        match self {
            Self::Closed { .. } => Self::CLOSED,
            Self::HalfOpen { admitted, successes } => {
                let successes = successes + 1;
                if successes >= config.half_open_max_probes {
                    Self::CLOSED
                } else {
                    Self::HalfOpen { admitted, successes }
                }
            }
            Self::Open { .. } => self,
        }
    }

    pub(crate) fn on_failure(self, now: Instant, config: &CircuitBreakerConfig) -> Self {
        match self {
            Self::Closed { consecutive_failures } => {
                let consecutive_failures = consecutive_failures.saturating_add(1);
                if consecutive_failures >= config.failure_threshold {
                    Self::Open { since: now }
                } else {
                    Self::Closed { consecutive_failures }
                }
            }
            Self::HalfOpen { .. } => Self::Open { since: now },
            Self::Open { .. } => self,
        }
    }

    /// An admitted call ended without an outcome; give back its probe slot.
    pub(crate) fn on_abandon(self) -> Self {
        match self {
            Self::HalfOpen { admitted, successes } => {
                Self::HalfOpen { admitted: admitted.saturating_sub(1), successes }
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, probes: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            open_duration: Duration::from_secs(30),
            half_open_max_probes: probes,
        }
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn test_closed_opens_at_threshold() {
        let config = config(3, 1);
        let now = Instant::now();
        let mut state = BreakerState::CLOSED;

        state = state.on_failure(now, &config);
        state = state.on_failure(now, &config);
        assert_eq!(state, BreakerState::Closed { consecutive_failures: 2 });

        state = state.on_failure(now, &config);
        assert_eq!(state, BreakerState::Open { since: now });
    }

    #[test]
    fn test_success_resets_closed_counter() {
        let config = config(3, 1);
        let state = BreakerState::Closed { consecutive_failures: 2 }.on_success(&config);
        assert_eq!(state, BreakerState::CLOSED);
    }

    #[test]
    fn test_open_rejects_until_duration_elapses() {
        let config = config(1, 2);
        let since = Instant::now();
        let open = BreakerState::Open { since };

        let (state, gate) = open.on_permit(since + Duration::from_secs(10), &config);
        assert_eq!(state, open);
        assert_eq!(gate, Gate::Reject { retry_in: Some(Duration::from_secs(20)) });

        let (state, gate) = open.on_permit(since + Duration::from_secs(30), &config);
        assert_eq!(state, BreakerState::HalfOpen { admitted: 1, successes: 0 });
        assert_eq!(gate, Gate::Admit { probe: true });
    }

    #[test]
    fn test_half_open_limits_probes() {
        let config = config(1, 2);
        let now = Instant::now();
        let state = BreakerState::HalfOpen { admitted: 1, successes: 0 };

        let (state, gate) = state.on_permit(now, &config);
        assert_eq!(gate, Gate::Admit { probe: true });
        let (state, gate) = state.on_permit(now, &config);
        assert_eq!(gate, Gate::Reject { retry_in: None });
        assert_eq!(state, BreakerState::HalfOpen { admitted: 2, successes: 0 });

        // An abandoned probe frees its slot.
        let (_, gate) = state.on_abandon().on_permit(now, &config);
        assert_eq!(gate, Gate::Admit { probe: true });
    }

    #[test]
    fn test_half_open_closes_after_enough_successes() {
        let config = config(1, 2);
        let state = BreakerState::HalfOpen { admitted: 2, successes: 0 }.on_success(&config);
        assert_eq!(state.public(), CircuitState::HalfOpen);
        assert_eq!(state.on_success(&config), BreakerState::CLOSED);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let config = config(5, 3);
        let now = Instant::now();
        let state = BreakerState::HalfOpen { admitted: 2, successes: 1 }.on_failure(now, &config);
        assert_eq!(state, BreakerState::Open { since: now });
    }
}
