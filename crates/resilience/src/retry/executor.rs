//! Retry loop
//!
//! [`RetrySequence`] holds the decision logic for one execution: classify a
//! failure, pick the delay, suspend. [`RetryExecutor`] runs the plain loop on
//! top of it; the resilient executor reuses the same sequence with a breaker
//! gate and idempotency guard around each attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::circuit_breaker::CircuitOpenError;
use crate::error::{Classify, ErrorKind, ExhaustionReason, ResilienceError, ResilienceResult};
use crate::observability::{default_observer, EventKind, ResilienceEvent, ResilienceObserver};
use crate::retry::context::{Attempt, RetryContext};
use crate::retry::jitter::JitterCalculator;
use crate::retry::policy::RetryPolicy;

/// What to do after a failed attempt.
#[derive(Debug)]
pub(crate) enum Step<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    Retry(Duration),
    Stop(ResilienceError<E>),
}

/// Decision state for one retry sequence.
pub(crate) struct RetrySequence<'a, E> {
    policy: &'a RetryPolicy,
    observer: &'a dyn ResilienceObserver,
    dependency: Option<&'a str>,
    context: RetryContext<E>,
    jitter: JitterCalculator,
}

impl<'a, E> RetrySequence<'a, E>
where
    E: std::error::Error + Classify + Send + Sync + 'static,
{
    pub(crate) fn new(
        policy: &'a RetryPolicy,
        observer: &'a dyn ResilienceObserver,
        dependency: Option<&'a str>,
    ) -> Self {
        Self {
            policy,
            observer,
            dependency,
            context: RetryContext::new(policy.max_attempts()),
            jitter: policy.jitter_calculator(),
        }
    }

    pub(crate) fn attempt(&self) -> Attempt {
        self.context.current()
    }

    pub(crate) fn context(&self) -> &RetryContext<E> {
        &self.context
    }

    /// Classify `error` and decide whether another attempt follows.
    pub(crate) fn on_failure(&mut self, error: E) -> Step<E> {
        let kind = error.error_kind();
        let attempt = self.context.attempt();

        if kind == ErrorKind::Cancelled {
            self.emit(ResilienceEvent::new(EventKind::RetryCancelled).attempt(attempt));
            return Step::Stop(ResilienceError::Cancelled {
                attempts: attempt,
                source: Some(error),
                history: self.context.take_history(),
            });
        }

        let reason = if !self.policy.is_retryable(&kind) {
            Some(ExhaustionReason::NonRetryable(kind.clone()))
        } else if self.context.is_last_attempt() {
            Some(ExhaustionReason::MaxAttempts)
        } else {
            None
        };

        if let Some(reason) = reason {
            self.emit(
                ResilienceEvent::new(EventKind::RetriesExhausted).attempt(attempt).error_kind(kind),
            );
            return Step::Stop(ResilienceError::Exhausted(self.context.exhaust(reason, error)));
        }

        let delay = match error.retry_after() {
            Some(hint) => {
                let delay = hint.min(self.policy.max_delay());
                self.jitter.observe(delay);
                delay
            }
            None => self.jitter.apply(self.policy.delay_for(attempt)),
        };

        self.emit(
            ResilienceEvent::new(EventKind::RetryScheduled)
                .attempt(attempt)
                .delay(delay)
                .error_kind(kind),
        );
        self.context.record_failure(error);
        Step::Retry(delay)
    }

    /// End the sequence because the breaker refused the current attempt.
    ///
    /// The rejected attempt never ran, so only earlier failures are kept.
    pub(crate) fn rejected(&mut self, error: CircuitOpenError) -> ResilienceError<E> {
        ResilienceError::CircuitOpen {
            dependency: error.dependency,
            state: error.state,
            retry_in: error.retry_in,
            history: self.context.take_history(),
        }
    }

    /// Suspend for `delay`, then move to the next attempt.
    ///
    /// The wait yields to the runtime and ends early with `Cancelled` if
    /// `cancel` fires first.
    pub(crate) async fn pause(
        &mut self,
        delay: Duration,
        cancel: Option<&CancellationToken>,
    ) -> ResilienceResult<(), E> {
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        let attempts = self.context.attempt();
                        self.emit(ResilienceEvent::new(EventKind::RetryCancelled).attempt(attempts));
                        return Err(ResilienceError::Cancelled {
                            attempts,
                            source: None,
                            history: self.context.take_history(),
                        });
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
        self.context.advance(delay);
        Ok(())
    }

    fn emit(&self, event: ResilienceEvent) {
        self.observer.on_event(&event.dependency(self.dependency));
    }
}

/// Result of a retry execution together with summary statistics.
#[derive(Debug)]
pub struct RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub result: ResilienceResult<T, E>,
    /// Number of real invocations of the operation
    pub attempts: u32,
    /// Delays slept between attempts, in order
    pub delays: Vec<Duration>,
}

impl<T, E> RetryOutcome<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn into_result(self) -> ResilienceResult<T, E> {
        self.result
    }

    pub fn total_delay(&self) -> Duration {
        self.delays.iter().fold(Duration::ZERO, |total, delay| total.saturating_add(*delay))
    }
}

/// Drives repeated invocation of an operation per a [`RetryPolicy`].
///
/// The executor is cheap to clone and safe to share; every call gets its own
/// [`RetryContext`] and jitter state.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: Arc<RetryPolicy>,
    observer: Arc<dyn ResilienceObserver>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor").field("policy", &self.policy).finish_non_exhaustive()
    }
}

impl RetryExecutor {
    pub fn new(policy: impl Into<Arc<RetryPolicy>>) -> Self {
        Self { policy: policy.into(), observer: default_observer() }
    }

    /// Send events to `observer` instead of `tracing`.
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails terminally, or the policy's
    /// attempts are used up.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Classify + Send + Sync + 'static,
    {
        self.execute_with_outcome(None, operation).await.into_result()
    }

    /// Like [`execute`](Self::execute), ending with `Cancelled` if `cancel`
    /// fires during an inter-attempt delay.
    pub async fn execute_with_cancel<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Classify + Send + Sync + 'static,
    {
        self.execute_with_outcome(Some(cancel), operation).await.into_result()
    }

    /// Run the retry loop and report attempts and delays alongside the result.
    #[instrument(skip_all, fields(max_attempts = self.policy.max_attempts()))]
    pub async fn execute_with_outcome<F, Fut, T, E>(
        &self,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Classify + Send + Sync + 'static,
    {
        let mut sequence = RetrySequence::new(&self.policy, self.observer.as_ref(), None);

        let result = loop {
            let attempt = sequence.attempt();
            debug!("Executing operation (attempt {}/{})", attempt.number, attempt.max_attempts);

            match operation(attempt).await {
                Ok(value) => {
                    if !attempt.is_first() {
                        debug!("Operation succeeded after {} retries", attempt.number - 1);
                    }
                    break Ok(value);
                }
                Err(error) => match sequence.on_failure(error) {
                    Step::Retry(delay) => {
                        if let Err(cancelled) = sequence.pause(delay, cancel).await {
                            break Err(cancelled);
                        }
                    }
                    Step::Stop(error) => break Err(error),
                },
            }
        };

        let context = sequence.context();
        RetryOutcome { result, attempts: context.attempt(), delays: context.delays().to_vec() }
    }
}
