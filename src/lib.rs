#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # ripcord
//!
//! Composable resilience policies for async Rust: retry, circuit breaking,
//! rate limiting, bulkheads, timeouts, and fallbacks under one execution
//! model.
//!
//! An [`Executor`] folds an ordered policy stack (outermost first) around a
//! work function. Every call threads a shared [`Execution`] record through
//! the stack — attempt and execution counters, the last outcome, elapsed
//! time — and a chained, cooperative cancellation signal: a timeout trips
//! the signal for everything beneath it, while a retry gives each attempt a
//! fresh signal so one attempt's timeout never poisons the next.
//!
//! ## Features
//!
//! - **Retry** with backoff schedules, jitter, predicates, abort conditions,
//!   and duration budgets
//! - **Circuit breakers** with sliding outcome windows, half-open probing,
//!   and manual controls
//! - **Timeouts** that cancel cooperatively through the signal chain
//! - **Token-bucket rate limiting**, smooth or bursty
//! - **Bulkheads** bounding in-flight work
//! - **Fallbacks** substituting values or handler outcomes
//! - Per-policy lifecycle listeners; deterministic test doubles for time
//!   (`Clock`) and sleep (`Sleeper`)
//!
//! ## Quick start
//!
//! ```rust
//! use ripcord::{Backoff, Executor, Jitter, PolicyError, RetryPolicy, TimeoutPolicy};
//! use std::num::ParseIntError;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), PolicyError<ParseIntError>> {
//!     let retry = RetryPolicy::builder()
//!         .max_attempts(3).expect("max_attempts > 0")
//!         .backoff(Backoff::exponential(Duration::from_millis(50)))
//!         .jitter(Jitter::full())
//!         .build();
//!     let timeout = TimeoutPolicy::new(Duration::from_secs(1)).expect("non-zero timeout");
//!
//!     // Outermost first: the retry re-runs the timed-out attempt.
//!     let executor = Executor::new().with(retry).with(timeout);
//!
//!     let value: u32 = executor
//!         .get(|_exec| async move { "42".parse::<u32>().map_err(PolicyError::Inner) })
//!         .await?;
//!     assert_eq!(value, 42);
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod bulkhead;
pub mod cancellation;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod events;
pub mod execution;
pub mod executor;
pub mod fallback;
pub mod jitter;
pub mod policy;
pub mod prelude;
pub mod presets;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;
pub mod timeout;

// Re-exports
pub use backoff::{Backoff, BackoffError, MAX_DELAY};
pub use bulkhead::{BulkheadError, BulkheadPermit, BulkheadPolicy};
pub use cancellation::{CancelReason, CancelSignal};
pub use circuit_breaker::{
    CircuitBreakerBuilder, CircuitBreakerError, CircuitBreakerPolicy, CircuitState,
};
pub use clock::{Clock, MonotonicClock};
pub use error::PolicyError;
pub use events::Listener;
pub use execution::Execution;
pub use executor::{compose, Executor};
pub use fallback::FallbackPolicy;
pub use jitter::Jitter;
pub use policy::{Inner, Outcome, Policy};
pub use rate_limit::{RateLimitError, RateLimiterPolicy};
pub use retry::{BuildError, RetryPolicy, RetryPolicyBuilder};
/// Sleep abstractions: `Sleeper` trait, `TokioSleeper` for production,
/// `InstantSleeper`/`TrackingSleeper` for tests.
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::{TimeoutError, TimeoutPolicy};
