//! Timeout policy.
//!
//! Races the inner chain against a timer. If the timer fires first the
//! layer trips the current cancellation signal with
//! [`CancelReason::TimeoutExceeded`] and resolves to a timeout error; the
//! race is settled at that moment, so an inner completion arriving later
//! cannot change this layer's outcome. The tripped inner chain is awaited
//! rather than abandoned: cooperative code unwinds at its next
//! signal-aware suspension point, and any stateful policies below still
//! record the outcome they saw.

use crate::cancellation::CancelReason;
use crate::error::PolicyError;
use crate::events::{emit, Listeners};
use crate::execution::Execution;
use crate::policy::{Inner, Outcome, Policy};
use crate::sleeper::{Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Errors raised by timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutError {
    /// A zero limit would cancel every attempt immediately.
    ZeroDuration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutError::ZeroDuration => write!(f, "timeout duration must be non-zero"),
        }
    }
}

impl std::error::Error for TimeoutError {}

/// Deadline wrapper around an inner policy chain.
#[derive(Clone)]
pub struct TimeoutPolicy<T, E> {
    limit: Duration,
    sleeper: Arc<dyn Sleeper>,
    listeners: Listeners<T, E>,
}

impl<T, E> std::fmt::Debug for TimeoutPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutPolicy").field("limit", &self.limit).finish()
    }
}

impl<T, E> TimeoutPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// Bound each pass through this layer to `limit`.
    pub fn new(limit: Duration) -> Result<Self, TimeoutError> {
        if limit.is_zero() {
            return Err(TimeoutError::ZeroDuration);
        }
        Ok(Self { limit, sleeper: Arc::new(TokioSleeper), listeners: Listeners::none() })
    }

    /// The configured limit.
    pub fn limit(&self) -> Duration {
        self.limit
    }

    /// Replace the sleeper driving the timer.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Observe inner completions that beat the timer.
    pub fn on_success<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.success = Some(Arc::new(listener));
        self
    }

    /// Observe this layer resolving with an error, timer-driven or inner.
    pub fn on_failure<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.failure = Some(Arc::new(listener));
        self
    }
}

#[async_trait]
impl<T, E> Policy<T, E> for TimeoutPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    async fn apply(&self, exec: &Execution<T, E>, inner: Inner<'_, T, E>) -> Outcome<T, E> {
        let signal = exec.current_signal();
        let started = Instant::now();

        let mut attempt = inner.invoke(exec);
        let mut timer = self.sleeper.sleep(self.limit);

        tokio::select! {
            outcome = &mut attempt => {
                match &outcome {
                    Ok(_) => emit(&self.listeners.success, exec),
                    Err(_) => emit(&self.listeners.failure, exec),
                }
                outcome
            }
            _ = &mut timer => {
                let elapsed = started.elapsed();
                signal.trip(CancelReason::TimeoutExceeded);
                tracing::debug!(limit = ?self.limit, "timeout expired; canceling attempt");
                // Cooperative unwind; the race is already settled in the
                // timer's favor, so the unwind's outcome is not surfaced.
                let _ = attempt.await;
                emit(&self.listeners.failure, exec);
                Err(PolicyError::Timeout { elapsed, limit: self.limit })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerPolicy;
    use crate::executor::Executor;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn fast_inner_passes_through() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(200)).unwrap();
        let executor = Executor::new().with(timeout);

        let result: Outcome<u32, TestError> = executor
            .get(|_exec| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn slow_inner_times_out() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(40)).unwrap();
        let executor = Executor::new().with(timeout);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_in_work = counter.clone();
        let result: Outcome<u32, TestError> = executor
            .get(move |_exec| {
                let counter = counter_in_work.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(42)
                }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        let (elapsed, limit) = err.timeout_details().unwrap();
        assert_eq!(limit, Duration::from_millis(40));
        assert!(elapsed >= limit);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "work did start");
    }

    #[tokio::test]
    async fn work_observes_the_trip() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(30)).unwrap();
        let executor = Executor::new().with(timeout);

        let observed = Arc::new(AtomicBool::new(false));
        let reason = Arc::new(Mutex::new(None));
        let observed_in_work = observed.clone();
        let reason_in_work = reason.clone();
        let result: Outcome<u32, TestError> = executor
            .get(move |exec| {
                let observed = observed_in_work.clone();
                let reason = reason_in_work.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    observed.store(exec.is_canceled(), Ordering::SeqCst);
                    *reason.lock().unwrap() = exec.cancel_reason();
                    Ok(1)
                }
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert!(observed.load(Ordering::SeqCst));
        assert_eq!(*reason.lock().unwrap(), Some(CancelReason::TimeoutExceeded));
    }

    #[tokio::test]
    async fn timer_wins_even_when_the_unwind_succeeds() {
        let timeout = TimeoutPolicy::new(Duration::from_millis(30)).unwrap();
        let executor = Executor::new().with(timeout);

        // The work sleeps through the limit and then reports success; the
        // race was already settled for the timer.
        let result: Outcome<u32, TestError> = executor
            .get(|_exec| async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Ok(5)
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn inner_errors_within_the_limit_pass_through() {
        let timeout = TimeoutPolicy::new(Duration::from_secs(5)).unwrap();
        let executor = Executor::new().with(timeout);

        let result: Outcome<u32, TestError> =
            executor.get(|_exec| async move { Err(PolicyError::Inner(TestError("boom"))) }).await;

        assert_eq!(result.unwrap_err().into_inner().unwrap().0, "boom");
    }

    #[tokio::test]
    async fn stateful_policies_below_still_record() {
        let breaker = CircuitBreakerPolicy::new(1, Duration::from_secs(60)).unwrap();
        let timeout = TimeoutPolicy::new(Duration::from_millis(30)).unwrap();
        let executor = Executor::new().with(timeout).with(breaker.clone());

        let result: Outcome<u32, TestError> = executor
            .get(|_exec| async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                Err(PolicyError::Inner(TestError("late failure")))
            })
            .await;

        assert!(result.unwrap_err().is_timeout());
        assert!(breaker.is_open(), "the breaker classified the unwound outcome");
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn failure_listener_counts_trips() {
        let trips = Arc::new(AtomicUsize::new(0));
        let trips_in_listener = trips.clone();
        let timeout = TimeoutPolicy::new(Duration::from_millis(20))
            .unwrap()
            .on_failure(move |_| {
                trips_in_listener.fetch_add(1, Ordering::SeqCst);
            });
        let executor = Executor::new().with(timeout);

        for _ in 0..2 {
            let _: Outcome<u32, TestError> = executor
                .get(|_exec| async move {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    Ok(0)
                })
                .await;
        }
        assert_eq!(trips.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_limit_is_rejected() {
        assert_eq!(
            TimeoutPolicy::<u32, TestError>::new(Duration::ZERO).unwrap_err(),
            TimeoutError::ZeroDuration
        );
    }
}
