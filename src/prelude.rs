//! Convenient re-exports for the common ripcord surface.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_DELAY},
    bulkhead::{BulkheadError, BulkheadPermit, BulkheadPolicy},
    cancellation::{CancelReason, CancelSignal},
    circuit_breaker::{
        CircuitBreakerBuilder, CircuitBreakerError, CircuitBreakerPolicy, CircuitState,
    },
    clock::{Clock, MonotonicClock},
    error::PolicyError,
    execution::Execution,
    executor::{compose, Executor},
    fallback::FallbackPolicy,
    jitter::Jitter,
    policy::{Inner, Outcome, Policy},
    rate_limit::{RateLimitError, RateLimiterPolicy},
    retry::{BuildError, RetryPolicy, RetryPolicyBuilder},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    timeout::{TimeoutError, TimeoutPolicy},
};
