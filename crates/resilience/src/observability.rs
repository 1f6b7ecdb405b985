//! Structured events for retries and breaker transitions
//!
//! The engine defines the event shape; where events go is up to the
//! [`ResilienceObserver`] the caller installs. [`TracingObserver`] is the
//! default and forwards everything to `tracing`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitState;
use crate::error::ErrorKind;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case", tag = "type"))]
pub enum EventKind {
    /// An attempt failed and another one is scheduled after `delay`.
    RetryScheduled,
    /// The retry loop gave up.
    RetriesExhausted,
    /// The sequence ended because of cancellation.
    RetryCancelled,
    /// The breaker refused admission.
    CallRejected,
    /// The breaker moved between states.
    BreakerTransition { from: CircuitState, to: CircuitState },
    /// A stored result was returned instead of invoking the operation.
    IdempotentReplay,
    /// The idempotency guard failed closed.
    IdempotencyConflict,
}

/// One observability event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResilienceEvent {
    pub kind: EventKind,
    /// Name of the protected dependency, when known
    pub dependency: Option<String>,
    pub attempt: Option<u32>,
    #[cfg_attr(
        feature = "serde",
        serde(with = "crate::utils::serde::option_duration_millis", default)
    )]
    pub delay: Option<Duration>,
    pub error_kind: Option<ErrorKind>,
    pub breaker_state: Option<CircuitState>,
}

impl ResilienceEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            dependency: None,
            attempt: None,
            delay: None,
            error_kind: None,
            breaker_state: None,
        }
    }

    pub fn dependency(mut self, dependency: Option<&str>) -> Self {
        self.dependency = dependency.map(str::to_string);
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn error_kind(mut self, kind: ErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn breaker_state(mut self, state: CircuitState) -> Self {
        self.breaker_state = Some(state);
        self
    }
}

/// Sink for [`ResilienceEvent`]s.
///
/// Called synchronously on the executing task and never while a breaker lock
/// is held; implementations should be cheap and must not block.
pub trait ResilienceObserver: Send + Sync {
    fn on_event(&self, event: &ResilienceEvent);
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ResilienceObserver for TracingObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        let dependency = event.dependency.as_deref().unwrap_or("-");
        let attempt = event.attempt.unwrap_or_default();
        let delay_ms = event.delay.map(|delay| delay.as_millis()).unwrap_or_default();
        let error_kind = event.error_kind.as_ref().map(ErrorKind::as_str).unwrap_or("-");

        match event.kind {
            EventKind::RetryScheduled => debug!(
                dependency,
                attempt,
                delay_ms,
                error_kind,
                "Attempt failed, retry scheduled"
            ),
            EventKind::RetriesExhausted => {
                warn!(dependency, attempt, error_kind, "Retry attempts exhausted");
            }
            EventKind::RetryCancelled => info!(dependency, attempt, "Retry sequence cancelled"),
            EventKind::CallRejected => debug!(
                dependency,
                state = %event.breaker_state.unwrap_or(CircuitState::Open),
                "Circuit breaker rejected call"
            ),
            EventKind::BreakerTransition { from, to } => match to {
                CircuitState::Open => warn!(dependency, %from, %to, "Circuit breaker opened"),
                _ => info!(dependency, %from, %to, "Circuit breaker state changed"),
            },
            EventKind::IdempotentReplay => debug!(dependency, "Returning stored idempotent result"),
            EventKind::IdempotencyConflict => {
                warn!(dependency, "Idempotency guard failed closed");
            }
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ResilienceObserver for NoopObserver {
    fn on_event(&self, _event: &ResilienceEvent) {}
}

/// Keeps every event in memory, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<ResilienceEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far.
    pub fn events(&self) -> Vec<ResilienceEvent> {
        self.events.lock().clone()
    }

    /// Events matching `predicate`.
    pub fn filter(&self, predicate: impl Fn(&ResilienceEvent) -> bool) -> Vec<ResilienceEvent> {
        self.events.lock().iter().filter(|event| predicate(event)).cloned().collect()
    }

    /// Breaker transitions seen so far, as `(from, to)` pairs.
    pub fn transitions(&self) -> Vec<(CircuitState, CircuitState)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event.kind {
                EventKind::BreakerTransition { from, to } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl ResilienceObserver for RecordingObserver {
    fn on_event(&self, event: &ResilienceEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Default observer shared by components created without one.
pub(crate) fn default_observer() -> Arc<dyn ResilienceObserver> {
    Arc::new(TracingObserver)
}
