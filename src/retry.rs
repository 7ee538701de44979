//! Retry policy.
//!
//! Re-runs the inner chain while its outcome is retryable, sleeping a
//! jittered, scheduled delay between attempts. Every attempt gets a fresh
//! cancellation signal chained under the signal that was current when the
//! policy was entered, so a timeout inside one attempt never poisons the
//! next, while a trip of the entry signal stops the loop at its next check
//! and wakes any in-progress sleep.

use crate::backoff::Backoff;
use crate::cancellation::{CancelReason, CancelSignal};
use crate::error::PolicyError;
use crate::events::{emit, Listeners};
use crate::execution::Execution;
use crate::jitter::Jitter;
use crate::policy::{Inner, Outcome, Policy};
use crate::sleeper::{Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

type ErrorPredicate<E> = Arc<dyn Fn(&PolicyError<E>) -> bool + Send + Sync>;
type ResultPredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Retrying wrapper around an inner policy chain.
#[derive(Clone)]
pub struct RetryPolicy<T, E> {
    /// `None` means unbounded.
    max_attempts: Option<u32>,
    backoff: Backoff,
    jitter: Jitter,
    max_duration: Option<Duration>,
    retry_on: ErrorPredicate<E>,
    retry_on_result: Option<ResultPredicate<T>>,
    abort_on: Option<ErrorPredicate<E>>,
    sleeper: Arc<dyn Sleeper>,
    listeners: Listeners<T, E>,
}

impl<T, E> std::fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("max_duration", &self.max_duration)
            .finish()
    }
}

/// Errors raised by retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// Zero attempts would never run the work function.
    ZeroMaxAttempts,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::ZeroMaxAttempts => write!(f, "max_attempts must be greater than zero"),
        }
    }
}

impl std::error::Error for BuildError {}

impl<T, E> RetryPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// Start building a retry policy. Defaults: 3 attempts, no delay, no
    /// jitter, retry on every error except cancellation.
    pub fn builder() -> RetryPolicyBuilder<T, E> {
        RetryPolicyBuilder::new()
    }

    fn resolve(
        &self,
        exec: &Execution<T, E>,
        outcome: Outcome<T, E>,
        entry: &CancelSignal,
    ) -> Outcome<T, E> {
        exec.install_signal(entry.clone());
        match &outcome {
            Ok(_) => emit(&self.listeners.success, exec),
            Err(_) => emit(&self.listeners.failure, exec),
        }
        outcome
    }

    /// The outcome surfaced when the entry signal trips mid-loop: the last
    /// error when there is one, otherwise the cancellation itself.
    fn canceled_or(outcome: Outcome<T, E>, entry: &CancelSignal) -> Outcome<T, E> {
        match outcome {
            Err(e) => Err(e),
            Ok(_) => Err(PolicyError::Canceled {
                reason: entry.reason().unwrap_or(CancelReason::ParentCanceled),
            }),
        }
    }
}

#[async_trait]
impl<T, E> Policy<T, E> for RetryPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    async fn apply(&self, exec: &Execution<T, E>, inner: Inner<'_, T, E>) -> Outcome<T, E> {
        let entry = exec.current_signal();
        let loop_started = Instant::now();
        let mut attempts_made: u32 = 1;

        loop {
            exec.install_signal(entry.child());
            exec.mark_attempt_start();
            emit(&self.listeners.attempt_start, exec);

            let outcome = inner.invoke(exec).await;

            if outcome.is_err() {
                emit(&self.listeners.failed_attempt, exec);
            }

            if let (Some(abort), Err(err)) = (&self.abort_on, &outcome) {
                if abort(err) {
                    tracing::debug!(attempt = attempts_made, "retry aborted by predicate");
                    return self.resolve(exec, outcome, &entry);
                }
            }

            let wants_retry = match &outcome {
                Ok(value) => {
                    let retry_result =
                        self.retry_on_result.as_ref().is_some_and(|pred| pred(value));
                    if retry_result {
                        emit(&self.listeners.failed_attempt, exec);
                    }
                    retry_result
                }
                Err(err) => (self.retry_on)(err),
            };

            if !wants_retry {
                return self.resolve(exec, outcome, &entry);
            }

            if entry.is_tripped() {
                return self.resolve(exec, Self::canceled_or(outcome, &entry), &entry);
            }

            if let Some(max) = self.max_attempts {
                if attempts_made >= max {
                    tracing::debug!(attempts = attempts_made, "retry attempts exhausted");
                    return self.resolve(exec, outcome, &entry);
                }
            }

            if let Some(budget) = self.max_duration {
                if loop_started.elapsed() >= budget {
                    tracing::debug!(?budget, "retry duration budget exhausted");
                    return self.resolve(exec, outcome, &entry);
                }
            }

            let delay = self.jitter.apply(self.backoff.delay(attempts_made as usize));
            emit(&self.listeners.retry_scheduled, exec);
            tracing::debug!(attempt = attempts_made, ?delay, "retry scheduled");

            if !delay.is_zero() {
                tokio::select! {
                    _ = self.sleeper.sleep(delay) => {}
                    _ = entry.cancelled() => {
                        return self.resolve(exec, Self::canceled_or(outcome, &entry), &entry);
                    }
                }
            }

            attempts_made += 1;
            exec.bump_attempt();
        }
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<T, E> {
    max_attempts: Option<u32>,
    backoff: Backoff,
    jitter: Jitter,
    max_duration: Option<Duration>,
    retry_on: ErrorPredicate<E>,
    retry_on_result: Option<ResultPredicate<T>>,
    abort_on: Option<ErrorPredicate<E>>,
    sleeper: Arc<dyn Sleeper>,
    listeners: Listeners<T, E>,
}

impl<T, E> RetryPolicyBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// Builder with the defaults described on [`RetryPolicy::builder`].
    pub fn new() -> Self {
        Self {
            max_attempts: Some(3),
            backoff: Backoff::none(),
            jitter: Jitter::None,
            max_duration: None,
            retry_on: Arc::new(|err: &PolicyError<E>| !err.is_canceled()),
            retry_on_result: None,
            abort_on: None,
            sleeper: Arc::new(TokioSleeper),
            listeners: Listeners::none(),
        }
    }

    /// Cap the number of attempts (including the first). Zero is rejected.
    pub fn max_attempts(mut self, attempts: u32) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::ZeroMaxAttempts);
        }
        self.max_attempts = Some(attempts);
        Ok(self)
    }

    /// Remove the attempt cap. Pair with [`Self::max_duration`] or rely on
    /// an outer timeout to bound the loop.
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Delay schedule between attempts.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Randomization applied to each computed delay.
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Stop retrying once this much time has passed since the first attempt.
    pub fn max_duration(mut self, budget: Duration) -> Self {
        self.max_duration = Some(budget);
        self
    }

    /// Retry only errors matching the predicate. Replaces the default
    /// retry-everything-but-cancellation behavior.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PolicyError<E>) -> bool + Send + Sync + 'static,
    {
        self.retry_on = Arc::new(predicate);
        self
    }

    /// Also retry successful results matching the predicate.
    pub fn retry_if_result<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.retry_on_result = Some(Arc::new(predicate));
        self
    }

    /// Stop retrying immediately when an error matches the predicate.
    pub fn abort_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PolicyError<E>) -> bool + Send + Sync + 'static,
    {
        self.abort_on = Some(Arc::new(predicate));
        self
    }

    /// Replace the sleeper used for inter-attempt delays.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Observe each attempt before the inner chain runs.
    pub fn on_attempt_start<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.attempt_start = Some(Arc::new(listener));
        self
    }

    /// Observe each attempt that ended in a retryable or failed outcome.
    pub fn on_failed_attempt<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.failed_attempt = Some(Arc::new(listener));
        self
    }

    /// Observe each scheduled retry, before its delay is slept.
    pub fn on_retry_scheduled<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.retry_scheduled = Some(Arc::new(listener));
        self
    }

    /// Observe the policy resolving successfully.
    pub fn on_success<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.success = Some(Arc::new(listener));
        self
    }

    /// Observe the policy resolving with an error.
    pub fn on_failure<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.failure = Some(Arc::new(listener));
        self
    }

    /// Finish the build.
    pub fn build(self) -> RetryPolicy<T, E> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            max_duration: self.max_duration,
            retry_on: self.retry_on,
            retry_on_result: self.retry_on_result,
            abort_on: self.abort_on,
            sleeper: self.sleeper,
            listeners: self.listeners,
        }
    }
}

impl<T, E> Default for RetryPolicyBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
