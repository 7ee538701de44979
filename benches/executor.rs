use criterion::{criterion_group, criterion_main, Criterion};
use ripcord::{
    Backoff, BulkheadPolicy, CircuitBreakerPolicy, Executor, InstantSleeper, PolicyError,
    RetryPolicy, TimeoutPolicy,
};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone)]
struct BenchError;

impl fmt::Display for BenchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bench error")
    }
}

impl std::error::Error for BenchError {}

fn full_stack() -> Executor<u64, BenchError> {
    let retry = RetryPolicy::builder()
        .max_attempts(3)
        .expect("max_attempts > 0")
        .backoff(Backoff::constant(Duration::from_millis(1)))
        .with_sleeper(InstantSleeper)
        .build();
    let breaker = CircuitBreakerPolicy::new(1_000_000, Duration::from_secs(60))
        .expect("valid breaker");
    let bulkhead = BulkheadPolicy::new(1024).expect("valid bulkhead");
    let timeout = TimeoutPolicy::new(Duration::from_secs(30)).expect("valid timeout");
    Executor::new().with(retry).with(breaker).with(bulkhead).with(timeout)
}

fn executor_overhead(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    let bare: Executor<u64, BenchError> = Executor::new();
    c.bench_function("empty_stack_success", |b| {
        b.to_async(&rt).iter(|| async {
            bare.get(|_exec| async move { Ok::<_, PolicyError<BenchError>>(1u64) })
                .await
                .expect("success")
        });
    });

    let stacked = full_stack();
    c.bench_function("four_layer_stack_success", |b| {
        b.to_async(&rt).iter(|| async {
            stacked
                .get(|_exec| async move { Ok::<_, PolicyError<BenchError>>(1u64) })
                .await
                .expect("success")
        });
    });
}

criterion_group!(benches, executor_overhead);
criterion_main!(benches);
