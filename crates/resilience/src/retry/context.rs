//! Per-execution retry state

use std::time::Duration;

use crate::error::{ExhaustionReason, RetryExhausted};

/// One failed attempt and its error.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord<E> {
    /// 1-based attempt number
    pub attempt: u32,
    pub error: E,
}

/// Attempt metadata handed to the operation on every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number
    pub number: u32,
    pub max_attempts: u32,
}

impl Attempt {
    pub fn is_first(&self) -> bool {
        self.number == 1
    }

    pub fn is_last(&self) -> bool {
        self.number >= self.max_attempts
    }
}

/// Mutable record of one retry sequence.
///
/// Created fresh per call and owned exclusively by it. The attempt counter
/// starts at 1 and never passes `max_attempts`.
#[derive(Debug)]
pub struct RetryContext<E> {
    attempt: u32,
    max_attempts: u32,
    errors: Vec<AttemptRecord<E>>,
    delays: Vec<Duration>,
}

impl<E> RetryContext<E> {
    pub fn new(max_attempts: u32) -> Self {
        Self { attempt: 1, max_attempts: max_attempts.max(1), errors: Vec::new(), delays: Vec::new() }
    }

    /// Current attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn current(&self) -> Attempt {
        Attempt { number: self.attempt, max_attempts: self.max_attempts }
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Errors of the attempts that were retried, oldest first.
    pub fn errors(&self) -> &[AttemptRecord<E>] {
        &self.errors
    }

    /// Delays slept so far, in order.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn total_delay(&self) -> Duration {
        self.delays.iter().fold(Duration::ZERO, |total, delay| total.saturating_add(*delay))
    }

    /// Record the current attempt's error before retrying it.
    pub(crate) fn record_failure(&mut self, error: E) {
        self.errors.push(AttemptRecord { attempt: self.attempt, error });
    }

    /// Move to the next attempt after sleeping `delay`.
    pub(crate) fn advance(&mut self, delay: Duration) {
        debug_assert!(self.attempt < self.max_attempts, "advanced past max_attempts");
        self.delays.push(delay);
        self.attempt = (self.attempt + 1).min(self.max_attempts);
    }

    /// Hand over the recorded errors when the sequence is cut short.
    pub(crate) fn take_history(&mut self) -> Vec<AttemptRecord<E>> {
        std::mem::take(&mut self.errors)
    }

    /// Close the sequence with `error` as the final failure.
    pub(crate) fn exhaust(&mut self, reason: ExhaustionReason, error: E) -> RetryExhausted<E> {
        let last = AttemptRecord { attempt: self.attempt, error };
        RetryExhausted::new(reason, std::mem::take(&mut self.errors), last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Failure};

    #[test]
    fn test_context_starts_at_first_attempt() {
        let context: RetryContext<Failure> = RetryContext::new(3);
        assert_eq!(context.attempt(), 1);
        assert!(context.current().is_first());
        assert!(!context.is_last_attempt());
        assert_eq!(context.total_delay(), Duration::ZERO);
    }

    #[test]
    fn test_zero_max_attempts_is_clamped() {
        let context: RetryContext<Failure> = RetryContext::new(0);
        assert_eq!(context.max_attempts(), 1);
        assert!(context.is_last_attempt());
    }

    #[test]
    fn test_exhaust_keeps_errors_in_order() {
        let mut context = RetryContext::new(3);
        context.record_failure(Failure::transient("first"));
        context.advance(Duration::from_millis(100));
        context.record_failure(Failure::timeout("second"));
        context.advance(Duration::from_millis(200));

        assert_eq!(context.attempt(), 3);
        assert!(context.is_last_attempt());
        assert_eq!(context.total_delay(), Duration::from_millis(300));

        let exhausted = context.exhaust(ExhaustionReason::MaxAttempts, Failure::transient("third"));
        let attempts: Vec<u32> = exhausted.history().map(|record| record.attempt).collect();
        let messages: Vec<&str> = exhausted.history().map(|record| record.error.message()).collect();

        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(messages, vec!["first", "second", "third"]);
        assert_eq!(exhausted.attempts(), 3);
        assert_eq!(exhausted.error_kind(), ErrorKind::Transient);
    }
}
