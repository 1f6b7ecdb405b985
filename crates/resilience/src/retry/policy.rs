//! Immutable retry configuration

use std::collections::HashSet;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult, ErrorKind};
use crate::retry::backoff::BackoffStrategy;
use crate::retry::constants::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, MAX_MAX_ATTEMPTS,
    MIN_MAX_ATTEMPTS,
};
use crate::retry::jitter::{JitterCalculator, JitterMode};

/// Attempt limits, delay bounds, strategy, jitter and error classification.
///
/// Built once through [`RetryPolicy::builder`] and shared read-only, usually
/// behind an `Arc`, by every call that uses it.
///
/// # Classification
///
/// A failure is retried when all of the following hold:
/// 1. its kind is not intrinsically terminal (`Permanent`, `Cancelled`);
/// 2. its kind is not listed in `non_retryable_kinds` (this always wins);
/// 3. `retryable_kinds` is empty or lists the kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    strategy: BackoffStrategy,
    jitter: JitterMode,
    retryable_kinds: HashSet<ErrorKind>,
    non_retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            strategy: BackoffStrategy::Exponential,
            jitter: JitterMode::Equal,
            retryable_kinds: HashSet::new(),
            non_retryable_kinds: HashSet::new(),
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    pub fn jitter(&self) -> JitterMode {
        self.jitter
    }

    pub fn retryable_kinds(&self) -> &HashSet<ErrorKind> {
        &self.retryable_kinds
    }

    pub fn non_retryable_kinds(&self) -> &HashSet<ErrorKind> {
        &self.non_retryable_kinds
    }

    /// Whether a failure of `kind` may be retried under this policy.
    pub fn is_retryable(&self, kind: &ErrorKind) -> bool {
        if kind.is_terminal() || self.non_retryable_kinds.contains(kind) {
            return false;
        }
        self.retryable_kinds.is_empty() || self.retryable_kinds.contains(kind)
    }

    /// Capped delay after `attempt`, before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.strategy.delay(self.base_delay, self.max_delay, attempt)
    }

    /// Fresh jitter state for one retry sequence.
    pub fn jitter_calculator(&self) -> JitterCalculator {
        JitterCalculator::new(self.jitter, self.base_delay, self.max_delay)
    }

    /// Upper bound on the total time spent suspended by one call:
    /// Σ delay(i) for i in 1..max_attempts.
    ///
    /// Worst-case wall-clock time for a call is this value plus the latency of
    /// `max_attempts` operation invocations. Retry-after hints are capped at
    /// `max_delay` and decorrelated jitter never exceeds it, so for those the
    /// cap bounds each term.
    pub fn worst_case_delay(&self) -> Duration {
        (1..self.max_attempts).fold(Duration::ZERO, |total, attempt| {
            let step = match self.jitter {
                JitterMode::Decorrelated => self.max_delay,
                _ => self.delay_for(attempt),
            };
            total.saturating_add(step)
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(ConfigError::invalid(format!(
                "max_attempts must be between {MIN_MAX_ATTEMPTS} and {MAX_MAX_ATTEMPTS}, got {}",
                self.max_attempts
            )));
        }

        if self.base_delay > self.max_delay {
            return Err(ConfigError::invalid(format!(
                "base_delay ({:?}) cannot be greater than max_delay ({:?})",
                self.base_delay, self.max_delay
            )));
        }

        if self.jitter == JitterMode::Decorrelated && self.base_delay.is_zero() {
            return Err(ConfigError::invalid(
                "decorrelated jitter needs a non-zero base_delay to grow from",
            ));
        }

        if let Some(kind) = self.retryable_kinds.iter().find(|kind| kind.is_terminal()) {
            return Err(ConfigError::invalid(format!("{kind} failures can never be retried")));
        }

        Ok(())
    }
}

/// Builder for [`RetryPolicy`] with fluent API
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.policy.strategy = strategy;
        self
    }

    pub fn fixed_backoff(self, delay: Duration) -> Self {
        self.strategy(BackoffStrategy::Fixed).base_delay(delay)
    }

    pub fn linear_backoff(self, base: Duration) -> Self {
        self.strategy(BackoffStrategy::Linear).base_delay(base)
    }

    pub fn exponential_backoff(self, base: Duration, max_delay: Duration) -> Self {
        self.strategy(BackoffStrategy::Exponential).base_delay(base).max_delay(max_delay)
    }

    pub fn jitter(mut self, jitter: JitterMode) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(JitterMode::None)
    }

    /// Restrict retries to the listed kinds (plus any added later).
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.policy.retryable_kinds.insert(kind);
        self
    }

    /// Never retry `kind`, even if it is also listed as retryable.
    pub fn never_retry_on(mut self, kind: ErrorKind) -> Self {
        self.policy.non_retryable_kinds.insert(kind);
        self
    }

    pub fn build(self) -> ConfigResult<RetryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = RetryPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.strategy(), BackoffStrategy::Exponential);
        assert_eq!(policy.jitter(), JitterMode::Equal);
    }

    #[test]
    fn test_builder_rejects_zero_attempts() {
        let result = RetryPolicy::builder().max_attempts(0).build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_builder_rejects_base_above_cap() {
        let result = RetryPolicy::builder()
            .base_delay(Duration::from_secs(5))
            .max_delay(Duration::from_secs(1))
            .build();
        assert!(result.is_err());
    }

    /// Decorrelated jitter grows from the base, so a zero base would pin
    /// every delay at zero.
    #[test]
    fn test_decorrelated_jitter_requires_non_zero_base() {
        let result = RetryPolicy::builder()
            .fixed_backoff(Duration::ZERO)
            .jitter(JitterMode::Decorrelated)
            .build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        let zero_base_without_decorrelation =
            RetryPolicy::builder().fixed_backoff(Duration::ZERO).jitter(JitterMode::Full).build();
        assert!(zero_base_without_decorrelation.is_ok());
    }

    #[test]
    fn test_builder_rejects_retrying_terminal_kinds() {
        let result = RetryPolicy::builder().retry_on(ErrorKind::Permanent).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_retryable_set_retries_everything_not_excluded() {
        let policy = RetryPolicy::builder()
            .never_retry_on(ErrorKind::Timeout)
            .build()
            .expect("valid policy");

        assert!(policy.is_retryable(&ErrorKind::Transient));
        assert!(policy.is_retryable(&ErrorKind::custom("throttled")));
        assert!(!policy.is_retryable(&ErrorKind::Timeout));
        assert!(!policy.is_retryable(&ErrorKind::Permanent));
        assert!(!policy.is_retryable(&ErrorKind::Cancelled));
    }

    #[test]
    fn test_non_retryable_takes_precedence() {
        let policy = RetryPolicy::builder()
            .retry_on(ErrorKind::Transient)
            .retry_on(ErrorKind::Timeout)
            .never_retry_on(ErrorKind::Timeout)
            .build()
            .expect("valid policy");

        assert!(policy.is_retryable(&ErrorKind::Transient));
        assert!(!policy.is_retryable(&ErrorKind::Timeout));
        assert!(!policy.is_retryable(&ErrorKind::custom("throttled")));
    }

    #[test]
    fn test_delay_for_applies_cap() {
        let policy = RetryPolicy::builder()
            .exponential_backoff(Duration::from_millis(100), Duration::from_millis(350))
            .build()
            .expect("valid policy");

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
    }

    /// The bound sums one delay per retry, never one for the final attempt.
    #[test]
    fn test_worst_case_delay() {
        let policy = RetryPolicy::builder()
            .max_attempts(4)
            .exponential_backoff(Duration::from_millis(100), Duration::from_millis(300))
            .build()
            .expect("valid policy");
        // 100 + 200 + 300 (capped)
        assert_eq!(policy.worst_case_delay(), Duration::from_millis(600));

        let single = RetryPolicy::no_retry();
        assert_eq!(single.worst_case_delay(), Duration::ZERO);

        let decorrelated = RetryPolicy::builder()
            .max_attempts(3)
            .base_delay(Duration::from_millis(10))
            .max_delay(Duration::from_secs(1))
            .jitter(JitterMode::Decorrelated)
            .build()
            .expect("valid policy");
        assert_eq!(decorrelated.worst_case_delay(), Duration::from_secs(2));
    }
}
