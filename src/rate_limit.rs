//! Token-bucket rate limiter policy.
//!
//! Admission-only: one token is taken before the inner chain runs, and the
//! inner outcome neither refunds nor consumes anything further. Two modes:
//!
//! - *smooth*: one permit per period, no burst (capacity 1);
//! - *bursty*: up to `burst` permits per period, refilled to full at each
//!   period boundary.
//!
//! Without a max wait, refusal is immediate. With one, the policy sleeps
//! toward the next refill, observing the cancellation signal, and gives up
//! once the remaining budget cannot cover the wait.
//!
//! Like the circuit breaker, one instance is meant to be shared: clones
//! share the bucket, guarded by its own mutex. Periods use millisecond
//! resolution.

use crate::cancellation::CancelReason;
use crate::clock::{Clock, MonotonicClock};
use crate::error::PolicyError;
use crate::events::{emit, Listeners};
use crate::execution::Execution;
use crate::policy::{Inner, Outcome, Policy};
use crate::sleeper::{Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Errors raised by rate-limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Periods below one millisecond are not representable.
    ZeroPeriod,
    /// A burst of zero permits admits nothing.
    ZeroBurst,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RateLimitError::ZeroPeriod => {
                write!(f, "rate limiter period must be at least one millisecond")
            }
            RateLimitError::ZeroBurst => write!(f, "burst must be greater than zero"),
        }
    }
}

impl std::error::Error for RateLimitError {}

struct BucketState {
    tokens: u64,
    last_refill_millis: u64,
}

struct LimiterShared {
    capacity: u64,
    refill_per_period: u64,
    period_millis: u64,
    bucket: Mutex<BucketState>,
    clock: Arc<dyn Clock>,
}

/// Shared-state token-bucket admission policy.
#[derive(Clone)]
pub struct RateLimiterPolicy<T, E> {
    shared: Arc<LimiterShared>,
    max_wait: Option<Duration>,
    sleeper: Arc<dyn Sleeper>,
    listeners: Listeners<T, E>,
}

impl<T, E> std::fmt::Debug for RateLimiterPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterPolicy")
            .field("capacity", &self.shared.capacity)
            .field("period_millis", &self.shared.period_millis)
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

impl<T, E> RateLimiterPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// One permit per `period`, no burst.
    pub fn smooth(period: Duration) -> Result<Self, RateLimitError> {
        Self::with_shape(1, 1, period)
    }

    /// Up to `burst` permits per `period`, refilled to full each period.
    pub fn bursty(burst: u64, period: Duration) -> Result<Self, RateLimitError> {
        if burst == 0 {
            return Err(RateLimitError::ZeroBurst);
        }
        Self::with_shape(burst, burst, period)
    }

    fn with_shape(
        capacity: u64,
        refill_per_period: u64,
        period: Duration,
    ) -> Result<Self, RateLimitError> {
        let period_millis = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        if period_millis == 0 {
            return Err(RateLimitError::ZeroPeriod);
        }
        Ok(Self {
            shared: Arc::new(LimiterShared {
                capacity,
                refill_per_period,
                period_millis,
                bucket: Mutex::new(BucketState { tokens: capacity, last_refill_millis: 0 }),
                clock: Arc::new(MonotonicClock::new()),
            }),
            max_wait: None,
            sleeper: Arc::new(TokioSleeper),
            listeners: Listeners::none(),
        })
    }

    /// Wait up to `max_wait` for a permit instead of failing fast.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Override the time source (deterministic tests). Resets the bucket;
    /// call before sharing the instance.
    pub fn with_clock<C: Clock + 'static>(self, clock: C) -> Self {
        Self {
            shared: Arc::new(LimiterShared {
                capacity: self.shared.capacity,
                refill_per_period: self.shared.refill_per_period,
                period_millis: self.shared.period_millis,
                bucket: Mutex::new(BucketState {
                    tokens: self.shared.capacity,
                    last_refill_millis: 0,
                }),
                clock: Arc::new(clock),
            }),
            ..self
        }
    }

    /// Replace the sleeper used while waiting for a permit.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Observe admitted calls whose inner chain succeeded.
    pub fn on_success<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.success = Some(Arc::new(listener));
        self
    }

    /// Observe refusals and admitted calls whose inner chain failed.
    pub fn on_failure<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.failure = Some(Arc::new(listener));
        self
    }

    /// Take one token, or report how long until the next refill.
    fn try_take(&self) -> Result<(), Duration> {
        let now = self.shared.clock.now_millis();
        let mut bucket = self.shared.bucket.lock().unwrap();

        let elapsed = now.saturating_sub(bucket.last_refill_millis);
        let periods = elapsed / self.shared.period_millis;
        if periods > 0 {
            bucket.tokens = bucket
                .tokens
                .saturating_add(periods.saturating_mul(self.shared.refill_per_period))
                .min(self.shared.capacity);
            bucket.last_refill_millis = bucket
                .last_refill_millis
                .saturating_add(periods.saturating_mul(self.shared.period_millis));
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            Ok(())
        } else {
            let since_refill = now.saturating_sub(bucket.last_refill_millis);
            Err(Duration::from_millis(self.shared.period_millis - since_refill))
        }
    }
}

#[async_trait]
impl<T, E> Policy<T, E> for RateLimiterPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    async fn apply(&self, exec: &Execution<T, E>, inner: Inner<'_, T, E>) -> Outcome<T, E> {
        if let Err(first_wait) = self.try_take() {
            let Some(max_wait) = self.max_wait else {
                tracing::debug!(wait = ?first_wait, "rate limit exceeded; failing fast");
                emit(&self.listeners.failure, exec);
                return Err(PolicyError::RateLimited { retry_after: Some(first_wait) });
            };

            let signal = exec.current_signal();
            let started = Instant::now();
            let mut wait = first_wait;
            loop {
                if wait > max_wait.saturating_sub(started.elapsed()) {
                    tracing::debug!(?wait, ?max_wait, "permit wait exceeds budget");
                    emit(&self.listeners.failure, exec);
                    return Err(PolicyError::RateLimited { retry_after: Some(wait) });
                }
                tokio::select! {
                    _ = self.sleeper.sleep(wait) => {}
                    _ = signal.cancelled() => {
                        emit(&self.listeners.failure, exec);
                        return Err(PolicyError::Canceled {
                            reason: signal.reason().unwrap_or(CancelReason::ParentCanceled),
                        });
                    }
                }
                match self.try_take() {
                    Ok(()) => break,
                    Err(next_wait) => wait = next_wait,
                }
            }
        }

        // Admission only: the outcome moves no tokens.
        let outcome = inner.invoke(exec).await;
        match &outcome {
            Ok(_) => emit(&self.listeners.success, exec),
            Err(_) => emit(&self.listeners.failure, exec),
        }
        outcome
    }
}
