//! Failure taxonomy for resilient execution
//!
//! Every operation failure carries an explicit [`ErrorKind`] through the
//! [`Classify`] trait. Retry and breaker logic dispatch on that kind instead
//! of inspecting error types at runtime.
//!
//! Failures produced by the engine itself are variants of
//! [`ResilienceError`]:
//!
//! | Variant | Produced by | Retried? |
//! |---------|-------------|----------|
//! | `CircuitOpen` | breaker gate | never (fails fast) |
//! | `Exhausted` | retry loop | already gave up |
//! | `Cancelled` | cancellation token or a `Cancelled` operation error | never |
//! | `IdempotencyConflict` | idempotency guard | never |
//! | `FallbackFailed` | the caller's fallback | never |
//!
//! `Exhausted` keeps every attempt's error in order, so "gave up after N
//! tries" and "rejected immediately" remain distinguishable through
//! [`RetryExhausted::reason`]. `CircuitOpen` and `Cancelled` carry the
//! errors of the attempts that ran before the sequence was cut short.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::circuit_breaker::CircuitState;
use crate::idempotency::ConflictReason;
use crate::retry::AttemptRecord;

/// Boxed error type used as an optional failure source
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for calls through the engine
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Result type for configuration validation
pub type ConfigResult<T> = Result<T, ConfigError>;

//==============================================================================
// Operation error classification
//==============================================================================

/// Classification of an operation failure.
///
/// The four built-in kinds cover the engine's needs; callers extend the
/// taxonomy with [`ErrorKind::Custom`] and reference custom kinds from
/// policy retry lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "String", into = "String"))]
pub enum ErrorKind {
    /// Temporary condition, retryable by default
    Transient,
    /// Will fail again no matter how often it is retried
    Permanent,
    /// The operation did not answer in time, retryable unless excluded
    Timeout,
    /// The caller abandoned the work; never retried
    Cancelled,
    /// Caller-defined kind
    Custom(Cow<'static, str>),
}

impl ErrorKind {
    /// Caller-defined kind from a static name.
    pub const fn custom(name: &'static str) -> Self {
        Self::Custom(Cow::Borrowed(name))
    }

    /// Kinds that no policy can make retryable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Permanent | Self::Cancelled)
    }

    /// Stable lowercase name, also used in settings files.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ErrorKind {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "transient" => Self::Transient,
            "permanent" => Self::Permanent,
            "timeout" => Self::Timeout,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Custom(Cow::Owned(value)),
        }
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}

impl FromStr for ErrorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

/// Implemented by operation errors so the engine can classify them.
pub trait Classify {
    /// The failure's kind.
    fn error_kind(&self) -> ErrorKind;

    /// Server-provided hint for how long to wait before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Ready-made classified error for operations without their own error type.
#[derive(Debug, Error)]
#[error("{kind} failure: {message}")]
pub struct Failure {
    kind: ErrorKind,
    message: String,
    retry_after: Option<Duration>,
    #[source]
    source: Option<BoxedError>,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), retry_after: None, source: None }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Attach a retry-after hint.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxedError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Classify for Failure {
    fn error_kind(&self) -> ErrorKind {
        self.kind.clone()
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

//==============================================================================
// Engine errors
//==============================================================================

/// Severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Whether the same call could succeed if issued again later.
    fn is_retryable(&self) -> bool;

    fn severity(&self) -> ErrorSeverity;

    /// Whether the failure needs immediate attention.
    fn is_critical(&self) -> bool;

    /// Suggested wait before issuing the call again.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Why a retry sequence gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExhaustionReason {
    /// Every allowed attempt failed.
    MaxAttempts,
    /// The failure's kind excluded it from retrying.
    NonRetryable(ErrorKind),
}

/// Composite failure carrying every attempt's error in order.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    reason: ExhaustionReason,
    earlier: Vec<AttemptRecord<E>>,
    last: AttemptRecord<E>,
}

impl<E> RetryExhausted<E> {
    pub(crate) fn new(
        reason: ExhaustionReason,
        earlier: Vec<AttemptRecord<E>>,
        last: AttemptRecord<E>,
    ) -> Self {
        Self { reason, earlier, last }
    }

    pub fn reason(&self) -> &ExhaustionReason {
        &self.reason
    }

    /// Number of real invocations made.
    pub fn attempts(&self) -> u32 {
        self.last.attempt
    }

    /// The error that ended the sequence.
    pub fn last_error(&self) -> &E {
        &self.last.error
    }

    /// Every attempt's error, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &AttemptRecord<E>> {
        self.earlier.iter().chain(std::iter::once(&self.last))
    }

    pub fn into_last_error(self) -> E {
        self.last.error
    }

    pub fn into_history(self) -> Vec<AttemptRecord<E>> {
        let mut history = self.earlier;
        history.push(self.last);
        history
    }
}

impl<E: Classify> RetryExhausted<E> {
    pub fn error_kind(&self) -> ErrorKind {
        self.last.error.error_kind()
    }
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            ExhaustionReason::MaxAttempts => {
                write!(f, "gave up after {} attempt(s): {}", self.attempts(), self.last.error)
            }
            ExhaustionReason::NonRetryable(kind) => write!(
                f,
                "non-retryable {kind} failure on attempt {}: {}",
                self.attempts(),
                self.last.error
            ),
        }
    }
}

impl<E> std::error::Error for RetryExhausted<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last.error)
    }
}

/// Coarse classification of a [`ResilienceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    CircuitOpen,
    RetryExhausted,
    Cancelled,
    IdempotencyConflict,
    FallbackFailed,
}

/// Errors returned by the retry executor and the resilient executor
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The breaker refused admission; the operation was not invoked.
    #[error("circuit breaker for '{dependency}' is {state}, call rejected")]
    CircuitOpen {
        dependency: String,
        state: CircuitState,
        /// Time left before the breaker admits probes, when known.
        retry_in: Option<Duration>,
        /// Failed attempts of this call before the rejection, oldest first
        history: Vec<AttemptRecord<E>>,
    },

    /// The retry loop gave up.
    #[error(transparent)]
    Exhausted(RetryExhausted<E>),

    /// The caller cancelled the sequence, or the operation reported itself
    /// cancelled.
    #[error("retry sequence cancelled after {attempts} attempt(s)")]
    Cancelled {
        attempts: u32,
        #[source]
        source: Option<E>,
        /// Earlier failed attempts, oldest first, excluding `source`
        history: Vec<AttemptRecord<E>>,
    },

    /// The idempotency guard failed closed instead of risking a second
    /// execution.
    #[error("idempotency conflict for key '{key}': {reason}")]
    IdempotencyConflict { key: String, reason: ConflictReason },

    /// The fallback's own error, unmodified.
    #[error("fallback failed: {source}")]
    FallbackFailed {
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::CircuitOpen { .. } => FailureKind::CircuitOpen,
            Self::Exhausted(_) => FailureKind::RetryExhausted,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::IdempotencyConflict { .. } => FailureKind::IdempotencyConflict,
            Self::FallbackFailed { .. } => FailureKind::FallbackFailed,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// The exhaustion record, if the retry loop gave up.
    pub fn as_exhausted(&self) -> Option<&RetryExhausted<E>> {
        match self {
            Self::Exhausted(exhausted) => Some(exhausted),
            _ => None,
        }
    }

    /// Number of real invocations made before this error, where known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted(exhausted) => Some(exhausted.attempts()),
            Self::Cancelled { attempts, .. } => Some(*attempts),
            Self::CircuitOpen { history, .. } => {
                Some(u32::try_from(history.len()).unwrap_or(u32::MAX))
            }
            Self::IdempotencyConflict { .. } | Self::FallbackFailed { .. } => None,
        }
    }

    /// Operation errors collected before this error, oldest first.
    ///
    /// For `Exhausted` this ends with the final error; for `Cancelled` the
    /// cancelling error itself is `source`.
    pub fn history(&self) -> Vec<&AttemptRecord<E>> {
        match self {
            Self::Exhausted(exhausted) => exhausted.history().collect(),
            Self::CircuitOpen { history, .. } | Self::Cancelled { history, .. } => {
                history.iter().collect()
            }
            Self::IdempotencyConflict { .. } | Self::FallbackFailed { .. } => Vec::new(),
        }
    }
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    /// Kind of the operation error behind this failure, if one exists.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Exhausted(exhausted) => Some(exhausted.error_kind()),
            Self::Cancelled { source: Some(source), .. } => Some(source.error_kind()),
            Self::Cancelled { source: None, .. } => Some(ErrorKind::Cancelled),
            Self::FallbackFailed { source } => Some(source.error_kind()),
            Self::CircuitOpen { .. } | Self::IdempotencyConflict { .. } => None,
        }
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        // An open breaker heals on its own; everything else already went
        // through the retry loop or must not run twice.
        matches!(self, Self::CircuitOpen { .. })
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::Exhausted(_) | Self::FallbackFailed { .. } => ErrorSeverity::Error,
            Self::IdempotencyConflict { .. } => ErrorSeverity::Critical,
        }
    }

    fn is_critical(&self) -> bool {
        matches!(self, Self::IdempotencyConflict { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_in, .. } => *retry_in,
            _ => None,
        }
    }
}

/// Invalid policy or breaker configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[cfg(feature = "serde")]
    #[error("Failed to parse settings: {message}")]
    Parse { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_round_trips_through_names() {
        for kind in [
            ErrorKind::Transient,
            ErrorKind::Permanent,
            ErrorKind::Timeout,
            ErrorKind::Cancelled,
            ErrorKind::custom("rate_limited"),
        ] {
            let parsed: ErrorKind = kind.as_str().parse().unwrap_or(ErrorKind::Transient);
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_error_kind_parsing_is_case_insensitive_for_builtins() {
        assert_eq!(ErrorKind::from("TIMEOUT".to_string()), ErrorKind::Timeout);
        assert_eq!(ErrorKind::from("canceled".to_string()), ErrorKind::Cancelled);
        assert_eq!(
            ErrorKind::from("Throttled".to_string()),
            ErrorKind::Custom(Cow::Owned("Throttled".to_string()))
        );
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(ErrorKind::Permanent.is_terminal());
        assert!(ErrorKind::Cancelled.is_terminal());
        assert!(!ErrorKind::Transient.is_terminal());
        assert!(!ErrorKind::Timeout.is_terminal());
        assert!(!ErrorKind::custom("throttled").is_terminal());
    }

    #[test]
    fn test_failure_carries_kind_and_hint() {
        let failure = Failure::transient("connection reset")
            .with_retry_after(Duration::from_millis(250))
            .with_source(std::io::Error::other("reset by peer"));

        assert_eq!(failure.error_kind(), ErrorKind::Transient);
        assert_eq!(Classify::retry_after(&failure), Some(Duration::from_millis(250)));
        assert_eq!(failure.to_string(), "transient failure: connection reset");
        assert!(std::error::Error::source(&failure).is_some());
    }

    #[test]
    fn test_exhausted_display_distinguishes_reasons() {
        let gave_up = RetryExhausted::new(
            ExhaustionReason::MaxAttempts,
            vec![AttemptRecord { attempt: 1, error: Failure::transient("a") }],
            AttemptRecord { attempt: 2, error: Failure::transient("b") },
        );
        assert_eq!(gave_up.to_string(), "gave up after 2 attempt(s): transient failure: b");
        assert_eq!(gave_up.history().count(), 2);

        let rejected = RetryExhausted::new(
            ExhaustionReason::NonRetryable(ErrorKind::Permanent),
            Vec::new(),
            AttemptRecord { attempt: 1, error: Failure::permanent("bad request") },
        );
        assert_eq!(
            rejected.to_string(),
            "non-retryable permanent failure on attempt 1: permanent failure: bad request"
        );
    }

    #[test]
    fn test_resilience_error_classification() {
        let open: ResilienceError<Failure> = ResilienceError::CircuitOpen {
            dependency: "payments".to_string(),
            state: CircuitState::Open,
            retry_in: Some(Duration::from_secs(5)),
            history: vec![AttemptRecord { attempt: 1, error: Failure::transient("reset") }],
        };
        assert_eq!(open.kind(), FailureKind::CircuitOpen);
        assert_eq!(open.attempts(), Some(1));
        assert_eq!(open.history()[0].error.message(), "reset");
        assert!(open.is_retryable());
        assert_eq!(ErrorClassification::retry_after(&open), Some(Duration::from_secs(5)));
        assert_eq!(open.error_kind(), None);

        let conflict: ResilienceError<Failure> = ResilienceError::IdempotencyConflict {
            key: "order-1".to_string(),
            reason: ConflictReason::LostRace,
        };
        assert!(conflict.is_critical());
        assert_eq!(conflict.severity(), ErrorSeverity::Critical);

        let cancelled: ResilienceError<Failure> =
            ResilienceError::Cancelled { attempts: 2, source: None, history: Vec::new() };
        assert_eq!(cancelled.attempts(), Some(2));
        assert_eq!(cancelled.error_kind(), Some(ErrorKind::Cancelled));
        assert!(!cancelled.is_retryable());
    }
}
