//! Policy lifecycle listeners.
//!
//! Each policy carries a [`Listeners`] slot set and fires the applicable
//! slots synchronously on the executing task, in the order attempt-started,
//! attempt-ended, policy-resolved. A panicking listener never changes the
//! policy's outcome: the panic is caught and the only diagnostic is a debug
//! log line.

use crate::execution::Execution;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A lifecycle callback observing the in-progress execution.
pub type Listener<T, E> = Arc<dyn Fn(&Execution<T, E>) + Send + Sync>;

/// Listener slots a policy may fire. Policies use the subset that applies to
/// them; unset slots cost nothing.
pub struct Listeners<T, E> {
    pub(crate) attempt_start: Option<Listener<T, E>>,
    pub(crate) failed_attempt: Option<Listener<T, E>>,
    pub(crate) retry_scheduled: Option<Listener<T, E>>,
    pub(crate) success: Option<Listener<T, E>>,
    pub(crate) failure: Option<Listener<T, E>>,
}

impl<T, E> Listeners<T, E> {
    pub(crate) fn none() -> Self {
        Self {
            attempt_start: None,
            failed_attempt: None,
            retry_scheduled: None,
            success: None,
            failure: None,
        }
    }
}

impl<T, E> Clone for Listeners<T, E> {
    fn clone(&self) -> Self {
        Self {
            attempt_start: self.attempt_start.clone(),
            failed_attempt: self.failed_attempt.clone(),
            retry_scheduled: self.retry_scheduled.clone(),
            success: self.success.clone(),
            failure: self.failure.clone(),
        }
    }
}

impl<T, E> Default for Listeners<T, E> {
    fn default() -> Self {
        Self::none()
    }
}

/// Fire a listener slot, swallowing panics.
pub(crate) fn emit<T, E>(slot: &Option<Listener<T, E>>, exec: &Execution<T, E>) {
    if let Some(listener) = slot {
        if catch_unwind(AssertUnwindSafe(|| listener(exec))).is_err() {
            tracing::debug!("policy listener panicked; outcome unchanged");
        }
    }
}
