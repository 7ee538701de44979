//! Ready-made executor recipes for common call profiles.
//!
//! Starting points, not prescriptions: each returns a plain [`Executor`]
//! that can be extended with further layers via [`Executor::with`].

use crate::backoff::Backoff;
use crate::bulkhead::BulkheadPolicy;
use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::executor::Executor;
use crate::jitter::Jitter;
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutPolicy;
use std::time::Duration;

/// Outbound HTTP-ish call: 3 attempts with jittered exponential backoff, a
/// breaker that opens after 5 windowed failures, and a 10s per-attempt
/// timeout.
pub fn http_call<T, E>() -> Executor<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    let retry = RetryPolicy::builder()
        .max_attempts(3)
        .expect("constant max_attempts is valid")
        .backoff(Backoff::exponential(Duration::from_millis(100)))
        .jitter(Jitter::full())
        .build();
    let breaker = CircuitBreakerPolicy::builder()
        .failure_threshold(5)
        .open_delay(Duration::from_secs(30))
        .build()
        .expect("constant breaker config is valid");
    let timeout =
        TimeoutPolicy::new(Duration::from_secs(10)).expect("constant timeout is valid");

    Executor::new().with(retry).with(breaker).with(timeout)
}

/// Database query: short constant-backoff retries, a 32-permit bulkhead,
/// and a 5s per-attempt timeout.
pub fn database<T, E>() -> Executor<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    let retry = RetryPolicy::builder()
        .max_attempts(5)
        .expect("constant max_attempts is valid")
        .backoff(Backoff::constant(Duration::from_millis(50)))
        .jitter(Jitter::equal())
        .build();
    let bulkhead = BulkheadPolicy::new(32).expect("constant bulkhead size is valid");
    let timeout = TimeoutPolicy::new(Duration::from_secs(5)).expect("constant timeout is valid");

    Executor::new().with(retry).with(bulkhead).with(timeout)
}

/// Long-running batch step: unbounded retries under a 10-minute budget with
/// capped linear backoff, and a 60s per-attempt timeout.
pub fn batch_job<T, E>() -> Executor<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    let backoff = Backoff::linear(Duration::from_secs(1))
        .with_max(Duration::from_secs(30))
        .expect("constant backoff cap is valid");
    let retry = RetryPolicy::builder()
        .unbounded()
        .backoff(backoff)
        .jitter(Jitter::full())
        .max_duration(Duration::from_secs(600))
        .build();
    let timeout =
        TimeoutPolicy::new(Duration::from_secs(60)).expect("constant timeout is valid");

    Executor::new().with(retry).with(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Outcome;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn presets_assemble_and_run() {
        for executor in [
            http_call::<u32, TestError>(),
            database::<u32, TestError>(),
            batch_job::<u32, TestError>(),
        ] {
            assert!(executor.depth() >= 2);
            let result: Outcome<u32, TestError> =
                executor.get(|_exec| async move { Ok(1) }).await;
            assert_eq!(result.unwrap(), 1);
        }
    }
}
