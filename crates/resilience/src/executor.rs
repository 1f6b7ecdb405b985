//! Breaker gate, retry loop and idempotency guard composed into one call
//!
//! Order, outer to inner: breaker gate → retry loop → idempotency guard →
//! operation. Every attempt asks the breaker for admission and reports its
//! own outcome, so a breaker that opens mid-sequence stops the remaining
//! attempts.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::circuit_breaker::CircuitBreaker;
use crate::clock::{Clock, SystemClock};
use crate::error::{Classify, ErrorKind, ResilienceError, ResilienceResult};
use crate::idempotency::{ConflictReason, Guarded, IdempotencyError, IdempotencyGuard};
use crate::observability::{default_observer, ResilienceObserver};
use crate::retry::executor::{RetrySequence, Step};
use crate::retry::{Attempt, RetryPolicy};

/// Per-call options for [`ResilientExecutor::execute_with`].
pub struct CallOptions<'a, T> {
    idempotency: Option<(&'a IdempotencyGuard<T>, String)>,
    cancel: Option<CancellationToken>,
}

impl<T> Default for CallOptions<'_, T> {
    fn default() -> Self {
        Self { idempotency: None, cancel: None }
    }
}

impl<'a, T> CallOptions<'a, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every attempt through `guard` under `key`.
    pub fn idempotency_key(mut self, guard: &'a IdempotencyGuard<T>, key: impl Into<String>) -> Self {
        self.idempotency = Some((guard, key.into()));
        self
    }

    /// End the call with `Cancelled` when `token` fires during a delay.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// What one gated attempt produced.
enum AttemptResult<T, E> {
    Done { value: T, replayed: bool },
    Failed(E),
    Conflict { key: String, reason: ConflictReason },
}

impl<T, E> From<Result<T, E>> for AttemptResult<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Done { value, replayed: false },
            Err(error) => Self::Failed(error),
        }
    }
}

/// Composes a [`CircuitBreaker`], a [`RetryPolicy`] and optionally an
/// [`IdempotencyGuard`] into one call contract.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
///
/// use pulsearc_resilience::{CircuitBreaker, Failure, ResilientExecutor, RetryPolicy};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = RetryPolicy::builder()
///     .max_attempts(3)
///     .exponential_backoff(Duration::from_millis(100), Duration::from_secs(2))
///     .build()?;
/// let breaker = CircuitBreaker::builder("payments").failure_threshold(5).build()?;
/// let executor = ResilientExecutor::new(policy, breaker);
///
/// let receipt = executor
///     .execute(|_attempt| async { Ok::<_, Failure>("receipt-1") })
///     .await?;
/// # let _ = receipt;
/// # Ok(())
/// # }
/// ```
pub struct ResilientExecutor<C: Clock = SystemClock> {
    policy: Arc<RetryPolicy>,
    breaker: CircuitBreaker<C>,
    observer: Arc<dyn ResilienceObserver>,
}

impl<C: Clock> Clone for ResilientExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            policy: Arc::clone(&self.policy),
            breaker: self.breaker.clone(),
            observer: Arc::clone(&self.observer),
        }
    }
}

impl<C: Clock> std::fmt::Debug for ResilientExecutor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("policy", &self.policy)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

impl<C: Clock> ResilientExecutor<C> {
    pub fn new(policy: impl Into<Arc<RetryPolicy>>, breaker: CircuitBreaker<C>) -> Self {
        Self { policy: policy.into(), breaker, observer: default_observer() }
    }

    /// Send retry events to `observer`. Breaker events go to the breaker's
    /// own observer.
    pub fn with_observer(mut self, observer: Arc<dyn ResilienceObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &CircuitBreaker<C> {
        &self.breaker
    }

    /// Run `operation` behind the breaker with retries.
    #[instrument(skip_all, fields(dependency = %self.breaker.name()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Classify + Send + Sync + 'static,
    {
        self.run(None, operation, |mut operation, attempt| async move {
            let result = operation(attempt).await;
            (operation, AttemptResult::from(result))
        })
        .await
    }

    /// Run `operation` with an idempotency key and/or cancellation token.
    ///
    /// With a key, `operation` is only called once the guard has found no
    /// stored result; a replayed call never reaches it.
    #[instrument(skip_all, fields(dependency = %self.breaker.name()))]
    pub async fn execute_with<F, Fut, T, E>(
        &self,
        options: CallOptions<'_, T>,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Clone + Send + Sync + 'static,
        E: std::error::Error + Classify + Send + Sync + 'static,
    {
        let CallOptions { idempotency, cancel } = options;
        let dependency = self.breaker.name();

        match idempotency {
            Some((guard, key)) => {
                let key = key.as_str();
                self.run(cancel.as_ref(), operation, |mut operation, attempt| async move {
                    let guarded = guard.run(key, Some(dependency), || operation(attempt)).await;
                    let result = match guarded {
                        Ok(Guarded { value, replayed }) => AttemptResult::Done { value, replayed },
                        Err(IdempotencyError::Operation(error)) => AttemptResult::Failed(error),
                        Err(IdempotencyError::Conflict { key, reason }) => {
                            AttemptResult::Conflict { key, reason }
                        }
                    };
                    (operation, result)
                })
                .await
            }
            None => {
                self.run(cancel.as_ref(), operation, |mut operation, attempt| async move {
                    let result = operation(attempt).await;
                    (operation, AttemptResult::from(result))
                })
                .await
            }
        }
    }

    /// Like [`execute_with`](Self::execute_with), running `fallback` when the
    /// breaker rejects the call or retries are exhausted.
    ///
    /// The fallback's own failure comes back as `FallbackFailed` and is never
    /// retried.
    pub async fn execute_with_fallback<F, Fut, FB, FbFut, T, E>(
        &self,
        options: CallOptions<'_, T>,
        operation: F,
        fallback: FB,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(ResilienceError<E>) -> FbFut,
        FbFut: Future<Output = Result<T, E>>,
        T: Clone + Send + Sync + 'static,
        E: std::error::Error + Classify + Send + Sync + 'static,
    {
        match self.execute_with(options, operation).await {
            Err(error) if error.is_circuit_open() || error.is_exhausted() => {
                debug!(dependency = %self.breaker.name(), %error, "Running fallback");
                fallback(error).await.map_err(|source| ResilienceError::FallbackFailed { source })
            }
            other => other,
        }
    }

    /// Gated retry loop.
    ///
    /// `step` borrows the operation for one attempt and hands it back, so
    /// the guard decides whether the operation is called at all.
    async fn run<Op, S, SFut, T, E>(
        &self,
        cancel: Option<&CancellationToken>,
        mut operation: Op,
        mut step: S,
    ) -> ResilienceResult<T, E>
    where
        S: FnMut(Op, Attempt) -> SFut,
        SFut: Future<Output = (Op, AttemptResult<T, E>)>,
        E: std::error::Error + Classify + Send + Sync + 'static,
    {
        let mut sequence =
            RetrySequence::new(&self.policy, self.observer.as_ref(), Some(self.breaker.name()));

        loop {
            let attempt = sequence.attempt();
            let admission = match self.breaker.permit() {
                Ok(admission) => admission,
                Err(rejected) => return Err(sequence.rejected(rejected)),
            };

            let (returned, result) = step(operation, attempt).await;
            operation = returned;

            match result {
                AttemptResult::Done { value, replayed } => {
                    // A replayed result says nothing about the dependency.
                    if replayed {
                        admission.release();
                    } else {
                        admission.record_success();
                    }
                    return Ok(value);
                }
                AttemptResult::Conflict { key, reason } => {
                    admission.release();
                    return Err(ResilienceError::IdempotencyConflict { key, reason });
                }
                AttemptResult::Failed(error) => {
                    if error.error_kind() == ErrorKind::Cancelled {
                        admission.release();
                    } else {
                        admission.record_failure();
                    }

                    match sequence.on_failure(error) {
                        Step::Retry(delay) => sequence.pause(delay, cancel).await?,
                        Step::Stop(error) => return Err(error),
                    }
                }
            }
        }
    }
}
