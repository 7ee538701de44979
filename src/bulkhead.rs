//! Bulkhead policy.
//!
//! Caps how many executions may be inside the inner chain at once. A permit
//! is taken before descending and released when the inner chain returns,
//! whatever the outcome. By default a full bulkhead refuses immediately;
//! an acquisition wait turns the refusal into a bounded, cancellable wait
//! for a permit.

use crate::cancellation::CancelReason;
use crate::error::PolicyError;
use crate::events::{emit, Listeners};
use crate::execution::Execution;
use crate::policy::{Inner, Outcome, Policy};
use crate::sleeper::{Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Errors raised by bulkhead configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkheadError {
    /// Zero permits would refuse every execution.
    ZeroPermits,
}

impl std::fmt::Display for BulkheadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BulkheadError::ZeroPermits => write!(f, "bulkhead must have at least one permit"),
        }
    }
}

impl std::error::Error for BulkheadError {}

/// RAII permit claimed outside the policy flow via
/// [`BulkheadPolicy::try_reserve`]. Dropping it returns the capacity.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Shared-state concurrency limiter.
#[derive(Clone)]
pub struct BulkheadPolicy<T, E> {
    semaphore: Arc<Semaphore>,
    max_permits: usize,
    acquire_wait: Option<Duration>,
    sleeper: Arc<dyn Sleeper>,
    listeners: Listeners<T, E>,
}

impl<T, E> std::fmt::Debug for BulkheadPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let in_flight = self.max_permits.saturating_sub(self.semaphore.available_permits());
        f.debug_struct("BulkheadPolicy")
            .field("max_permits", &self.max_permits)
            .field("in_flight", &in_flight)
            .field("acquire_wait", &self.acquire_wait)
            .finish()
    }
}

impl<T, E> BulkheadPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// Bulkhead with a fixed permit count.
    pub fn new(max_permits: usize) -> Result<Self, BulkheadError> {
        if max_permits == 0 {
            return Err(BulkheadError::ZeroPermits);
        }
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            acquire_wait: None,
            sleeper: Arc::new(TokioSleeper),
            listeners: Listeners::none(),
        })
    }

    /// Wait up to `wait` for a permit instead of refusing immediately.
    pub fn with_acquire_wait(mut self, wait: Duration) -> Self {
        self.acquire_wait = Some(wait);
        self
    }

    /// Replace the sleeper bounding the acquisition wait.
    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Observe admitted executions whose inner chain succeeded.
    pub fn on_success<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.success = Some(Arc::new(listener));
        self
    }

    /// Observe refusals and admitted executions whose inner chain failed.
    pub fn on_failure<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.failure = Some(Arc::new(listener));
        self
    }

    /// Permits currently in use.
    pub fn in_flight(&self) -> usize {
        self.max_permits.saturating_sub(self.semaphore.available_permits())
    }

    /// Total permit count.
    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Claim a permit outside the policy flow, if one is free. Useful for
    /// reserving capacity ahead of a burst; the permit returns on drop.
    pub fn try_reserve(&self) -> Option<BulkheadPermit> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| BulkheadPermit { _permit: permit })
    }

    fn refusal(&self) -> PolicyError<E> {
        PolicyError::BulkheadFull { in_flight: self.in_flight(), max: self.max_permits }
    }
}

#[async_trait]
impl<T, E> Policy<T, E> for BulkheadPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    async fn apply(&self, exec: &Execution<T, E>, inner: Inner<'_, T, E>) -> Outcome<T, E> {
        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let Some(wait) = self.acquire_wait else {
                    tracing::debug!(max = self.max_permits, "bulkhead full; refusing");
                    emit(&self.listeners.failure, exec);
                    return Err(self.refusal());
                };
                let signal = exec.current_signal();
                tokio::select! {
                    acquired = self.semaphore.clone().acquire_owned() => {
                        match acquired {
                            Ok(permit) => permit,
                            Err(_) => {
                                emit(&self.listeners.failure, exec);
                                return Err(self.refusal());
                            }
                        }
                    }
                    _ = self.sleeper.sleep(wait) => {
                        tracing::debug!(?wait, "bulkhead wait expired; refusing");
                        emit(&self.listeners.failure, exec);
                        return Err(self.refusal());
                    }
                    _ = signal.cancelled() => {
                        emit(&self.listeners.failure, exec);
                        return Err(PolicyError::Canceled {
                            reason: signal.reason().unwrap_or(CancelReason::ParentCanceled),
                        });
                    }
                }
            }
        };

        let outcome = inner.invoke(exec).await;
        drop(permit);

        match &outcome {
            Ok(_) => emit(&self.listeners.success, exec),
            Err(_) => emit(&self.listeners.failure, exec),
        }
        outcome
    }
}
