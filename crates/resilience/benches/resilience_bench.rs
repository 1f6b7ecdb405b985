//! Resilience hot-path benchmarks
//!
//! Breaker admission and reporting, the open short-circuit, backoff and
//! jitter arithmetic, and the async retry and composed executors.
//!
//! Run with: `cargo bench --bench resilience_bench -p pulsearc-resilience`

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pulsearc_resilience::{
    BackoffStrategy, CircuitBreaker, Failure, JitterCalculator, JitterMode, MockClock,
    NoopObserver, ResilienceResult, ResilientExecutor, RetryExecutor, RetryPolicy,
};
use tokio::runtime::Builder as RuntimeBuilder;

// ============================================================================
// Circuit Breaker Benchmarks
// ============================================================================

fn quiet_breaker(name: &str, threshold: u32) -> CircuitBreaker<MockClock> {
    CircuitBreaker::builder(name)
        .failure_threshold(threshold)
        .open_duration(Duration::from_secs(60))
        .half_open_max_probes(2)
        .clock(MockClock::new())
        .observer(Arc::new(NoopObserver))
        .build()
        .expect("valid breaker config for benchmarks")
}

fn bench_breaker_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker_paths");

    group.bench_function("permit_record_success", |b| {
        let breaker = quiet_breaker("bench", 5);
        b.iter(|| match breaker.permit() {
            Ok(admission) => admission.record_success(),
            Err(err) => panic!("closed breaker rejected a call: {err}"),
        });
    });

    group.bench_function("fail_to_open", |b| {
        b.iter(|| {
            let breaker = quiet_breaker("bench", 5);
            for _ in 0..5 {
                if let Ok(admission) = breaker.permit() {
                    admission.record_failure();
                }
            }
            black_box(breaker.state());
        });
    });

    group.bench_function("open_short_circuit", |b| {
        let breaker = quiet_breaker("bench", 1);
        if let Ok(admission) = breaker.permit() {
            admission.record_failure();
        }

        b.iter(|| {
            let _rejected = black_box(breaker.permit());
        });
    });

    group.bench_function("open_half_open_recover", |b| {
        b.iter(|| {
            let clock = MockClock::new();
            let breaker = CircuitBreaker::builder("bench")
                .failure_threshold(3)
                .open_duration(Duration::from_millis(10))
                .half_open_max_probes(2)
                .clock(clock.clone())
                .observer(Arc::new(NoopObserver))
                .build()
                .expect("valid breaker config for benchmarks");

            for _ in 0..3 {
                if let Ok(admission) = breaker.permit() {
                    admission.record_failure();
                }
            }
            clock.advance(Duration::from_millis(10));
            for _ in 0..2 {
                if let Ok(admission) = breaker.permit() {
                    admission.record_success();
                }
            }
            black_box(breaker.state());
        });
    });

    group.finish();
}

// ============================================================================
// Backoff and Jitter Benchmarks
// ============================================================================

fn bench_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("backoff_delay");
    let attempts = [1_u32, 2, 5, 10, 64];
    let base = Duration::from_millis(100);
    let cap = Duration::from_secs(30);

    for strategy in [BackoffStrategy::Fixed, BackoffStrategy::Linear, BackoffStrategy::Exponential]
    {
        group.bench_with_input(
            BenchmarkId::new("delay", format!("{strategy:?}")),
            &strategy,
            |b, strategy| {
                b.iter(|| {
                    for attempt in attempts {
                        black_box(strategy.delay(base, cap, attempt));
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_jitter(c: &mut Criterion) {
    let mut group = c.benchmark_group("jitter");
    let delays = [Duration::from_millis(1), Duration::from_millis(250), Duration::from_secs(5)];

    for mode in [JitterMode::None, JitterMode::Full, JitterMode::Equal, JitterMode::Decorrelated] {
        group.bench_with_input(BenchmarkId::new("apply", format!("{mode:?}")), &mode, |b, mode| {
            let mut jitter = JitterCalculator::with_seed(
                *mode,
                Duration::from_millis(100),
                Duration::from_secs(30),
                7,
            );
            b.iter(|| {
                for delay in delays {
                    black_box(jitter.apply(delay));
                }
            });
        });
    }

    group.finish();
}

// ============================================================================
// Executor Benchmarks
// ============================================================================

fn build_runtime() -> tokio::runtime::Runtime {
    RuntimeBuilder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime should build for benchmarks")
}

fn zero_delay_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .fixed_backoff(Duration::ZERO)
        .no_jitter()
        .build()
        .expect("valid retry policy for benchmarks")
}

fn bench_executors(c: &mut Criterion) {
    let mut group = c.benchmark_group("executor_outcomes");
    let runtime = build_runtime();

    group.bench_function("retry_immediate_success", |b| {
        let executor = RetryExecutor::new(zero_delay_policy(3)).with_observer(Arc::new(NoopObserver));
        b.to_async(&runtime).iter(|| async {
            let result: ResilienceResult<(), Failure> = executor.execute(|_| async { Ok(()) }).await;
            if let Err(err) = result {
                panic!("retry immediate success failed: {err}");
            }
        });
    });

    group.bench_function("retry_transient_then_success", |b| {
        let executor = RetryExecutor::new(zero_delay_policy(5)).with_observer(Arc::new(NoopObserver));
        b.to_async(&runtime).iter(|| async {
            let result: ResilienceResult<(), Failure> = executor
                .execute(|attempt| async move {
                    if attempt.number <= 3 {
                        Err(Failure::transient("bench"))
                    } else {
                        Ok(())
                    }
                })
                .await;
            if let Err(err) = result {
                panic!("retry transient path exhausted: {err}");
            }
        });
    });

    group.bench_function("composed_success", |b| {
        let executor = ResilientExecutor::new(zero_delay_policy(3), quiet_breaker("bench", 5))
            .with_observer(Arc::new(NoopObserver));
        b.to_async(&runtime).iter(|| async {
            let result: ResilienceResult<u32, Failure> =
                executor.execute(|_| async { Ok(black_box(7)) }).await;
            let _result = black_box(result);
        });
    });

    group.finish();
}

criterion_group!(resilience, bench_breaker_paths, bench_backoff, bench_jitter, bench_executors);
criterion_main!(resilience);
