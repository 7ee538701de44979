//! Circuit breaker policy.
//!
//! Tracks the outcomes of its inner chain in a sliding window and stops
//! admitting work once failures in the window reach the configured
//! threshold. After the open delay the next admission turns into a half-open
//! probe; enough consecutive probe successes close the circuit again, a
//! single probe failure reopens it.
//!
//! One breaker instance is deliberately shared across calls (and executors):
//! clones share state, so outcomes aggregate wherever the instance is used.
//! All counter updates happen under the instance's single mutex, keeping
//! classification linearizable and manual [`CircuitBreakerPolicy::open`] /
//! [`CircuitBreakerPolicy::close`] atomic with in-flight classifications.

use crate::clock::{Clock, MonotonicClock};
use crate::error::PolicyError;
use crate::events::{emit, Listeners};
use crate::execution::Execution;
use crate::policy::{Inner, Outcome, Policy};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Admitting work normally.
    Closed,
    /// Short-circuiting all work.
    Open,
    /// Admitting probes to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Errors raised by breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// The failure threshold must admit at least one failure.
    ZeroFailureThreshold,
    /// The success threshold must require at least one probe.
    ZeroSuccessThreshold,
    /// The outcome window must hold at least one outcome.
    ZeroWindow,
    /// A window smaller than the failure threshold can never trip.
    WindowBelowFailureThreshold {
        /// Configured window size.
        window: usize,
        /// Configured failure threshold.
        threshold: usize,
    },
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroFailureThreshold => write!(f, "failure_threshold must be > 0"),
            Self::ZeroSuccessThreshold => write!(f, "success_threshold must be > 0"),
            Self::ZeroWindow => write!(f, "window must be > 0"),
            Self::WindowBelowFailureThreshold { window, threshold } => write!(
                f,
                "window ({}) must be >= failure_threshold ({})",
                window, threshold
            ),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

type StateListener = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;
type FailurePredicate<T, E> = Arc<dyn Fn(&Outcome<T, E>) -> bool + Send + Sync>;

struct BreakerCore {
    state: CircuitState,
    /// Last N classifications; `true` marks a failure.
    window: VecDeque<bool>,
    window_failures: usize,
    half_open_successes: usize,
    entered_at_millis: u64,
    success_total: u64,
    failure_total: u64,
}

struct BreakerShared<T, E> {
    core: Mutex<BreakerCore>,
    failure_threshold: usize,
    window_size: usize,
    success_threshold: usize,
    open_delay: Duration,
    clock: Arc<dyn Clock>,
    classify_failure: FailurePredicate<T, E>,
    listeners: Listeners<T, E>,
    state_change: Option<StateListener>,
}

/// Shared-state circuit breaker.
pub struct CircuitBreakerPolicy<T, E> {
    shared: Arc<BreakerShared<T, E>>,
}

impl<T, E> Clone for CircuitBreakerPolicy<T, E> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T, E> std::fmt::Debug for CircuitBreakerPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.core.lock().unwrap().state;
        f.debug_struct("CircuitBreakerPolicy")
            .field("state", &state)
            .field("failure_threshold", &self.shared.failure_threshold)
            .field("window", &self.shared.window_size)
            .field("success_threshold", &self.shared.success_threshold)
            .field("open_delay", &self.shared.open_delay)
            .finish()
    }
}

/// Replace state and reset state-scoped counters. Returns the prior state.
fn shift_state(core: &mut BreakerCore, to: CircuitState, now: u64) -> CircuitState {
    let from = core.state;
    core.state = to;
    core.entered_at_millis = now;
    core.window.clear();
    core.window_failures = 0;
    core.half_open_successes = 0;
    from
}

impl<T, E> CircuitBreakerPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// Breaker that opens after `failure_threshold` windowed failures and
    /// probes again after `open_delay`.
    pub fn new(
        failure_threshold: usize,
        open_delay: Duration,
    ) -> Result<Self, CircuitBreakerError> {
        Self::builder().failure_threshold(failure_threshold).open_delay(open_delay).build()
    }

    /// Start building a breaker. Defaults: failure threshold 1 over a
    /// window of 1, success threshold 1, open delay 60s.
    pub fn builder() -> CircuitBreakerBuilder<T, E> {
        CircuitBreakerBuilder::new()
    }

    /// Current state. Does not apply the open-delay refresh; admission does.
    pub fn state(&self) -> CircuitState {
        self.shared.core.lock().unwrap().state
    }

    /// Whether the breaker currently admits work without probing.
    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    /// Whether the breaker is short-circuiting.
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Whether the breaker is probing recovery.
    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Successes classified over the breaker's lifetime.
    pub fn success_count(&self) -> u64 {
        self.shared.core.lock().unwrap().success_total
    }

    /// Failures classified over the breaker's lifetime.
    pub fn failure_count(&self) -> u64 {
        self.shared.core.lock().unwrap().failure_total
    }

    /// Force the breaker open. The open delay restarts now.
    pub fn open(&self) {
        let now = self.shared.clock.now_millis();
        let transition = {
            let mut core = self.shared.core.lock().unwrap();
            if core.state == CircuitState::Open {
                None
            } else {
                Some(shift_state(&mut core, CircuitState::Open, now))
            }
        };
        if let Some(from) = transition {
            tracing::warn!(%from, "circuit breaker opened manually");
            self.notify(from, CircuitState::Open);
        }
    }

    /// Force the breaker closed, clearing the outcome window.
    pub fn close(&self) {
        let now = self.shared.clock.now_millis();
        let transition = {
            let mut core = self.shared.core.lock().unwrap();
            if core.state == CircuitState::Closed {
                None
            } else {
                Some(shift_state(&mut core, CircuitState::Closed, now))
            }
        };
        if let Some(from) = transition {
            tracing::info!(%from, "circuit breaker closed manually");
            self.notify(from, CircuitState::Closed);
        }
    }

    /// Admission check: refresh the open -> half-open transition if due,
    /// then either admit or produce the short-circuit error.
    fn admit(&self) -> Result<(), PolicyError<E>> {
        let now = self.shared.clock.now_millis();
        let open_delay_millis =
            u64::try_from(self.shared.open_delay.as_millis()).unwrap_or(u64::MAX);

        let refused = {
            let mut core = self.shared.core.lock().unwrap();
            match core.state {
                CircuitState::Closed | CircuitState::HalfOpen => return Ok(()),
                CircuitState::Open => {
                    let waited = now.saturating_sub(core.entered_at_millis);
                    if waited >= open_delay_millis {
                        let from = shift_state(&mut core, CircuitState::HalfOpen, now);
                        drop(core);
                        tracing::info!("circuit breaker half-open; admitting probe");
                        self.notify(from, CircuitState::HalfOpen);
                        return Ok(());
                    }
                    core.failure_total
                }
            }
        };
        Err(PolicyError::CircuitOpen { failure_count: refused })
    }

    /// Record one classified outcome; returns a transition if one occurred.
    fn record(&self, is_failure: bool) -> Option<(CircuitState, CircuitState)> {
        let now = self.shared.clock.now_millis();
        let mut core = self.shared.core.lock().unwrap();
        if is_failure {
            core.failure_total += 1;
        } else {
            core.success_total += 1;
        }

        match core.state {
            CircuitState::Closed => {
                core.window.push_back(is_failure);
                if is_failure {
                    core.window_failures += 1;
                }
                while core.window.len() > self.shared.window_size {
                    if core.window.pop_front() == Some(true) {
                        core.window_failures -= 1;
                    }
                }
                if core.window_failures >= self.shared.failure_threshold {
                    let failures = core.window_failures;
                    let from = shift_state(&mut core, CircuitState::Open, now);
                    drop(core);
                    tracing::warn!(
                        failures,
                        threshold = self.shared.failure_threshold,
                        "circuit breaker opened"
                    );
                    return Some((from, CircuitState::Open));
                }
                None
            }
            CircuitState::HalfOpen => {
                if is_failure {
                    let from = shift_state(&mut core, CircuitState::Open, now);
                    drop(core);
                    tracing::warn!("circuit breaker probe failed; reopening");
                    Some((from, CircuitState::Open))
                } else {
                    core.half_open_successes += 1;
                    if core.half_open_successes >= self.shared.success_threshold {
                        let from = shift_state(&mut core, CircuitState::Closed, now);
                        drop(core);
                        tracing::info!("circuit breaker recovered; closing");
                        Some((from, CircuitState::Closed))
                    } else {
                        None
                    }
                }
            }
            // A call admitted earlier finished after a manual open; keep the
            // totals, leave the window alone.
            CircuitState::Open => None,
        }
    }

    fn notify(&self, from: CircuitState, to: CircuitState) {
        if from == to {
            return;
        }
        if let Some(listener) = &self.shared.state_change {
            if catch_unwind(AssertUnwindSafe(|| listener(from, to))).is_err() {
                tracing::debug!("state-change listener panicked; swallowing");
            }
        }
    }
}

#[async_trait]
impl<T, E> Policy<T, E> for CircuitBreakerPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    async fn apply(&self, exec: &Execution<T, E>, inner: Inner<'_, T, E>) -> Outcome<T, E> {
        if let Err(refused) = self.admit() {
            emit(&self.shared.listeners.failure, exec);
            return Err(refused);
        }

        let outcome = inner.invoke(exec).await;

        let is_failure = (self.shared.classify_failure)(&outcome);
        if let Some((from, to)) = self.record(is_failure) {
            self.notify(from, to);
        }
        if is_failure {
            emit(&self.shared.listeners.failure, exec);
        } else {
            emit(&self.shared.listeners.success, exec);
        }
        outcome
    }
}

/// Builder for [`CircuitBreakerPolicy`].
pub struct CircuitBreakerBuilder<T, E> {
    failure_threshold: usize,
    window: Option<usize>,
    success_threshold: usize,
    open_delay: Duration,
    clock: Arc<dyn Clock>,
    classify_failure: FailurePredicate<T, E>,
    listeners: Listeners<T, E>,
    state_change: Option<StateListener>,
}

impl<T, E> CircuitBreakerBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// Builder with the defaults described on
    /// [`CircuitBreakerPolicy::builder`].
    pub fn new() -> Self {
        Self {
            failure_threshold: 1,
            window: None,
            success_threshold: 1,
            open_delay: Duration::from_secs(60),
            clock: Arc::new(MonotonicClock::new()),
            classify_failure: Arc::new(|outcome: &Outcome<T, E>| outcome.is_err()),
            listeners: Listeners::none(),
            state_change: None,
        }
    }

    /// Failures within the window that open the circuit. Unless
    /// [`Self::window`] is set, the window size follows this value.
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Number of recent outcomes considered when counting failures.
    pub fn window(mut self, size: usize) -> Self {
        self.window = Some(size);
        self
    }

    /// Consecutive half-open successes required to close the circuit.
    pub fn success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Time the circuit stays open before admitting a probe.
    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Replace the default every-error-is-a-failure classification.
    pub fn classify_failure<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Outcome<T, E>) -> bool + Send + Sync + 'static,
    {
        self.classify_failure = Arc::new(predicate);
        self
    }

    /// Override the time source (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Observe state transitions as `(from, to)` pairs.
    pub fn on_state_change<F>(mut self, listener: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.state_change = Some(Arc::new(listener));
        self
    }

    /// Observe outcomes classified as successes.
    pub fn on_success<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.success = Some(Arc::new(listener));
        self
    }

    /// Observe outcomes classified as failures, including short-circuits.
    pub fn on_failure<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.failure = Some(Arc::new(listener));
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<CircuitBreakerPolicy<T, E>, CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::ZeroFailureThreshold);
        }
        if self.success_threshold == 0 {
            return Err(CircuitBreakerError::ZeroSuccessThreshold);
        }
        let window_size = self.window.unwrap_or(self.failure_threshold);
        if window_size == 0 {
            return Err(CircuitBreakerError::ZeroWindow);
        }
        if window_size < self.failure_threshold {
            return Err(CircuitBreakerError::WindowBelowFailureThreshold {
                window: window_size,
                threshold: self.failure_threshold,
            });
        }

        Ok(CircuitBreakerPolicy {
            shared: Arc::new(BreakerShared {
                core: Mutex::new(BreakerCore {
                    state: CircuitState::Closed,
                    window: VecDeque::with_capacity(window_size + 1),
                    window_failures: 0,
                    half_open_successes: 0,
                    entered_at_millis: 0,
                    success_total: 0,
                    failure_total: 0,
                }),
                failure_threshold: self.failure_threshold,
                window_size,
                success_threshold: self.success_threshold,
                open_delay: self.open_delay,
                clock: self.clock,
                classify_failure: self.classify_failure,
                listeners: self.listeners,
                state_change: self.state_change,
            }),
        })
    }
}

impl<T, E> Default for CircuitBreakerBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
