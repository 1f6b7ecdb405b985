use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::circuit_breaker::config::CircuitBreakerConfig;
use crate::circuit_breaker::state::{BreakerState, CircuitState, Gate};
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigResult, ResilienceError};
use crate::observability::{default_observer, EventKind, ResilienceEvent, ResilienceObserver};

/// The breaker refused admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit breaker for '{dependency}' is {state}, call rejected")]
pub struct CircuitOpenError {
    pub dependency: String,
    pub state: CircuitState,
    /// Time left before probes are admitted, when known
    pub retry_in: Option<Duration>,
}

impl<E> From<CircuitOpenError> for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: CircuitOpenError) -> Self {
        ResilienceError::CircuitOpen {
            dependency: error.dependency,
            state: error.state,
            retry_in: error.retry_in,
            history: Vec::new(),
        }
    }
}

/// Circuit breaker counters for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_probes: u32,
    pub half_open_successes: u32,
    pub total_admitted: u64,
    pub total_rejected: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    #[cfg_attr(feature = "serde", serde(with = "crate::utils::serde::duration_millis"))]
    pub time_in_state: Duration,
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    admitted: u64,
    rejected: u64,
    successes: u64,
    failures: u64,
}

#[derive(Debug)]
struct Core {
    state: BreakerState,
    /// Bumped on every state change; admissions from an older epoch do not
    /// drive transitions.
    generation: u64,
    last_transition: Instant,
    totals: Totals,
}

type Transition = (CircuitState, CircuitState);

impl Core {
    fn apply(&mut self, next: BreakerState, now: Instant) -> Option<Transition> {
        let from = self.state.public();
        let to = next.public();
        self.state = next;
        if from == to {
            return None;
        }
        self.generation += 1;
        self.last_transition = now;
        Some((from, to))
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Success,
    Failure,
    Abandoned,
}

struct Inner<C> {
    name: String,
    config: CircuitBreakerConfig,
    core: Mutex<Core>,
    clock: C,
    observer: Arc<dyn ResilienceObserver>,
}

/// Dependency-health state machine gating calls to one dependency.
///
/// Long-lived and shared: clones refer to the same state. Ask
/// [`permit`](Self::permit) before every call and report the outcome through
/// the returned [`Admission`].
///
/// Transitions:
/// - Closed → Open after `failure_threshold` consecutive failures
/// - Open → HalfOpen on the first permit after `open_duration`
/// - HalfOpen → Closed after `half_open_max_probes` successful probes
/// - HalfOpen → Open on any probe failure
pub struct CircuitBreaker<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Breaker for `name` with the system clock and tracing observer.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::builder(name).config(config).build()
    }

    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder<SystemClock> {
        CircuitBreakerBuilder {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            clock: SystemClock,
            observer: None,
        }
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub(crate) fn from_parts(
        name: String,
        config: CircuitBreakerConfig,
        clock: C,
        observer: Arc<dyn ResilienceObserver>,
    ) -> Self {
        let core = Core {
            state: BreakerState::CLOSED,
            generation: 0,
            last_transition: clock.now(),
            totals: Totals::default(),
        };
        Self { inner: Arc::new(Inner { name, config, core: Mutex::new(core), clock, observer }) }
    }

    /// Name of the protected dependency.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.inner.config
    }

    /// Current state as last recorded. Open→HalfOpen is only decided by
    /// [`permit`](Self::permit).
    pub fn state(&self) -> CircuitState {
        self.inner.core.lock().state.public()
    }

    /// Ask to invoke the protected operation.
    ///
    /// Never invokes anything itself; a rejection means the caller must not
    /// call the dependency.
    pub fn permit(&self) -> Result<Admission<C>, CircuitOpenError> {
        let now = self.inner.clock.now();
        let (gate, generation, state, transition) = {
            let mut core = self.inner.core.lock();
            let (next, gate) = core.state.on_permit(now, &self.inner.config);
            let transition = core.apply(next, now);
            match gate {
                Gate::Admit { .. } => core.totals.admitted += 1,
                Gate::Reject { .. } => core.totals.rejected += 1,
            }
            (gate, core.generation, core.state.public(), transition)
        };

        if let Some((from, to)) = transition {
            self.inner.emit_transition(from, to);
        }

        match gate {
            Gate::Admit { probe } => {
                Ok(Admission { inner: Arc::clone(&self.inner), generation, probe, settled: false })
            }
            Gate::Reject { retry_in } => {
                self.inner.observer.on_event(
                    &ResilienceEvent::new(EventKind::CallRejected)
                        .dependency(Some(self.inner.name.as_str()))
                        .breaker_state(state),
                );
                Err(CircuitOpenError { dependency: self.inner.name.clone(), state, retry_in })
            }
        }
    }

    /// Counters and state for monitoring.
    pub fn snapshot(&self) -> CircuitBreakerMetrics {
        let now = self.inner.clock.now();
        let core = self.inner.core.lock();
        let (consecutive_failures, half_open_probes, half_open_successes) = match core.state {
            BreakerState::Closed { consecutive_failures } => (consecutive_failures, 0, 0),
            BreakerState::Open { .. } => (0, 0, 0),
            BreakerState::HalfOpen { admitted, successes } => (0, admitted, successes),
        };

        CircuitBreakerMetrics {
            name: self.inner.name.clone(),
            state: core.state.public(),
            consecutive_failures,
            half_open_probes,
            half_open_successes,
            total_admitted: core.totals.admitted,
            total_rejected: core.totals.rejected,
            total_successes: core.totals.successes,
            total_failures: core.totals.failures,
            time_in_state: now.saturating_duration_since(core.last_transition),
        }
    }

    /// Force the breaker back to Closed. Outstanding admissions become stale.
    pub fn reset(&self) {
        let now = self.inner.clock.now();
        let transition = {
            let mut core = self.inner.core.lock();
            let transition = core.apply(BreakerState::CLOSED, now);
            if transition.is_none() {
                core.generation += 1;
            }
            transition
        };

        info!(dependency = %self.inner.name, "Circuit breaker manually reset to closed state");
        if let Some((from, to)) = transition {
            self.inner.emit_transition(from, to);
        }
    }
}

impl<C: Clock> Inner<C> {
    fn settle(&self, generation: u64, outcome: Outcome) {
        let now = self.clock.now();
        let transition = {
            let mut core = self.core.lock();
            match outcome {
                Outcome::Success => core.totals.successes += 1,
                Outcome::Failure => core.totals.failures += 1,
                Outcome::Abandoned => {}
            }

            if core.generation != generation {
                debug!(
                    dependency = %self.name,
                    ?outcome,
                    "Ignoring outcome reported against an earlier breaker state"
                );
                return;
            }

            let next = match outcome {
                Outcome::Success => core.state.on_success(&self.config),
                Outcome::Failure => core.state.on_failure(now, &self.config),
                Outcome::Abandoned => core.state.on_abandon(),
            };
            core.apply(next, now)
        };

        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
        }
    }

    fn emit_transition(&self, from: CircuitState, to: CircuitState) {
        self.observer.on_event(
            &ResilienceEvent::new(EventKind::BreakerTransition { from, to })
                .dependency(Some(self.name.as_str()))
                .breaker_state(to),
        );
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
///
/// Report the outcome exactly once with [`record_success`](Self::record_success)
/// or [`record_failure`](Self::record_failure). Dropping an admission without
/// a report releases its probe slot and counts as neither.
#[must_use = "report the call outcome through the admission"]
pub struct Admission<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
    generation: u64,
    probe: bool,
    settled: bool,
}

impl<C: Clock> fmt::Debug for Admission<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Admission")
            .field("dependency", &self.inner.name)
            .field("generation", &self.generation)
            .field("probe", &self.probe)
            .finish()
    }
}

impl<C: Clock> Admission<C> {
    /// Whether this call is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.settle(Outcome::Success);
    }

    pub fn record_failure(mut self) {
        self.settle(Outcome::Failure);
    }

    /// Give the admission back without reporting an outcome.
    pub fn release(mut self) {
        self.settle(Outcome::Abandoned);
    }

    fn settle(&mut self, outcome: Outcome) {
        if !self.settled {
            self.settled = true;
            self.inner.settle(self.generation, outcome);
        }
    }
}

impl<C: Clock> Drop for Admission<C> {
    fn drop(&mut self) {
        self.settle(Outcome::Abandoned);
    }
}

/// Builder for [`CircuitBreaker`]
pub struct CircuitBreakerBuilder<C: Clock> {
    name: String,
    config: CircuitBreakerConfig,
    clock: C,
    observer: Option<Arc<dyn ResilienceObserver>>,
}

impl<C: Clock> CircuitBreakerBuilder<C> {
    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    pub fn half_open_max_probes(mut self, probes: u32) -> Self {
        self.config.half_open_max_probes = probes;
        self
    }

    /// Set a custom clock for the circuit breaker (useful for testing)
    pub fn clock<C2: Clock>(self, clock: C2) -> CircuitBreakerBuilder<C2> {
        CircuitBreakerBuilder {
            name: self.name,
            config: self.config,
            clock,
            observer: self.observer,
        }
    }

    pub fn observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreaker<C>> {
        self.config.validate()?;
        let observer = self.observer.unwrap_or_else(default_observer);
        Ok(CircuitBreaker::from_parts(self.name, self.config, self.clock, observer))
    }
}
