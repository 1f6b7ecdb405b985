//! Resilient execution for calls to unreliable dependencies.
//!
//! Wraps an async operation with retries, a per-dependency circuit breaker
//! and optional idempotency so callers always get either a value or one
//! distinguishable failure.
//!
//! # Components
//!
//! - [`retry`]: backoff strategies, jitter, [`RetryPolicy`] and
//!   [`RetryExecutor`]
//! - [`circuit_breaker`]: [`CircuitBreaker`], its [`Admission`] token and a
//!   [`CircuitBreakerRegistry`]
//! - [`idempotency`]: [`IdempotencyGuard`] over an [`IdempotencyStore`]
//! - [`executor`]: [`ResilientExecutor`], composing all of the above
//! - [`observability`]: [`ResilienceEvent`]s delivered to a
//!   [`ResilienceObserver`], `tracing` by default
//!
//! # Timing
//!
//! Suspension happens only between attempts, with `tokio::time::sleep`. A
//! call spends at most [`RetryPolicy::worst_case_delay`] suspended, on top of
//! the latency of up to `max_attempts` operation invocations. Per-attempt
//! timeouts are the operation's business.
//!
//! # Features
//!
//! - `serde` (default): serializable events and records, and
//!   [`settings::ResilienceSettings`] loaded from TOML

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod executor;
pub mod idempotency;
pub mod observability;
pub mod retry;
#[cfg(feature = "serde")]
pub mod settings;
pub mod utils;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
    CircuitBreakerRegistry, CircuitOpenError, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{
    Classify, ConfigError, ConfigResult, ErrorClassification, ErrorKind, ErrorSeverity,
    ExhaustionReason, Failure, FailureKind, ResilienceError, ResilienceResult, RetryExhausted,
};
pub use executor::{CallOptions, ResilientExecutor};
pub use idempotency::{
    ConflictReason, IdempotencyError, IdempotencyGuard, IdempotencyRecord, IdempotencyStore,
    InMemoryIdempotencyStore, StoreError,
};
pub use observability::{
    EventKind, NoopObserver, RecordingObserver, ResilienceEvent, ResilienceObserver,
    TracingObserver,
};
pub use retry::{
    Attempt, AttemptRecord, BackoffStrategy, JitterCalculator, JitterMode, RetryContext,
    RetryExecutor, RetryOutcome, RetryPolicy, RetryPolicyBuilder,
};
#[cfg(feature = "serde")]
pub use settings::ResilienceSettings;
