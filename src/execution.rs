//! Per-call execution record.
//!
//! One [`Execution`] is created per call and threaded by reference through
//! the whole policy stack; user code receives a clone of the same handle.
//! All mutation happens through crate-internal methods, so the surface
//! visible to user code is read-only: counters, the last recorded outcome,
//! cancellation state, and timing.

use crate::cancellation::{CancelReason, CancelSignal};
use crate::error::PolicyError;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

struct LastOutcome<T, E> {
    result: Option<T>,
    error: Option<PolicyError<E>>,
}

struct ExecState<T, E> {
    /// 1-based; bumped by the retry layer for each new attempt.
    attempt: AtomicU32,
    /// Bumped on every inner-layer re-entry, retry-driven or not.
    executions: AtomicU32,
    started_at: SystemTime,
    start: Instant,
    attempt_start: Mutex<Instant>,
    last: Mutex<LastOutcome<T, E>>,
    signal: Mutex<CancelSignal>,
}

/// Shared per-call record of the in-progress work.
pub struct Execution<T, E> {
    state: Arc<ExecState<T, E>>,
}

impl<T, E> Clone for Execution<T, E> {
    fn clone(&self) -> Self {
        Self { state: self.state.clone() }
    }
}

impl<T, E> fmt::Debug for Execution<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("attempt", &self.attempt())
            .field("executions", &self.executions())
            .field("is_canceled", &self.is_canceled())
            .finish()
    }
}

impl<T, E> Execution<T, E> {
    pub(crate) fn new(signal: CancelSignal) -> Self {
        let now = Instant::now();
        Self {
            state: Arc::new(ExecState {
                attempt: AtomicU32::new(1),
                executions: AtomicU32::new(0),
                started_at: SystemTime::now(),
                start: now,
                attempt_start: Mutex::new(now),
                last: Mutex::new(LastOutcome { result: None, error: None }),
                signal: Mutex::new(signal),
            }),
        }
    }

    /// The current attempt number (1-based; monotonically non-decreasing).
    pub fn attempt(&self) -> u32 {
        self.state.attempt.load(Ordering::SeqCst)
    }

    /// Inner-layer re-entries so far, including non-retry re-entries. Always
    /// at least the attempt number once the work function runs.
    pub fn executions(&self) -> u32 {
        self.state.executions.load(Ordering::SeqCst)
    }

    /// Whether the current attempt's cancellation signal has tripped.
    pub fn is_canceled(&self) -> bool {
        self.state.signal.lock().unwrap().is_tripped()
    }

    /// Why the current attempt was canceled, if it was.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.state.signal.lock().unwrap().reason()
    }

    /// Time since the overall call began.
    pub fn elapsed(&self) -> Duration {
        self.state.start.elapsed()
    }

    /// Time since the current attempt began.
    pub fn attempt_elapsed(&self) -> Duration {
        self.state.attempt_start.lock().unwrap().elapsed()
    }

    /// Wall-clock instant the overall call began.
    pub fn started_at(&self) -> SystemTime {
        self.state.started_at
    }

    pub(crate) fn bump_attempt(&self) {
        self.state.attempt.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn note_reentry(&self) {
        self.state.executions.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn mark_attempt_start(&self) {
        *self.state.attempt_start.lock().unwrap() = Instant::now();
    }

    pub(crate) fn current_signal(&self) -> CancelSignal {
        self.state.signal.lock().unwrap().clone()
    }

    pub(crate) fn install_signal(&self, signal: CancelSignal) {
        *self.state.signal.lock().unwrap() = signal;
    }
}

impl<T, E> Execution<T, E>
where
    T: Clone,
    E: Clone,
{
    /// Result of the most recent successful inner completion, if any.
    pub fn last_result(&self) -> Option<T> {
        self.state.last.lock().unwrap().result.clone()
    }

    /// Error from the most recent inner completion or short-circuit. `None`
    /// when the last inner invocation succeeded.
    pub fn last_error(&self) -> Option<PolicyError<E>> {
        self.state.last.lock().unwrap().error.clone()
    }

    pub(crate) fn record_outcome(&self, outcome: &Result<T, PolicyError<E>>) {
        let mut last = self.state.last.lock().unwrap();
        match outcome {
            Ok(value) => {
                last.result = Some(value.clone());
                last.error = None;
            }
            Err(err) => {
                last.error = Some(err.clone());
            }
        }
    }
}
