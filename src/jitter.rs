//! Randomization of retry delays.
//!
//! Synchronized retries from many clients produce load spikes exactly when a
//! dependency is least able to absorb them; jitter spreads them out. Pick
//! [`Jitter::None`] for deterministic tests, [`Jitter::Full`] as the default
//! spreader, [`Jitter::Equal`] to keep a floor of half the delay, or
//! decorrelated jitter when consecutive sleeps should grow independently of
//! the backoff schedule.

use rand::{rng, Rng};
use std::time::Duration;

/// State for decorrelated jitter. The previous sleep feeds the next bound,
/// so the value lives behind a mutex shared by clones of the policy.
#[derive(Debug)]
pub struct DecorrelatedState {
    base: Duration,
    max: Duration,
    previous: std::sync::Mutex<Duration>,
}

impl Clone for DecorrelatedState {
    fn clone(&self) -> Self {
        let previous = *self.previous.lock().unwrap();
        Self { base: self.base, max: self.max, previous: std::sync::Mutex::new(previous) }
    }
}

/// Strategy for randomizing a computed delay.
#[derive(Debug, Clone)]
pub enum Jitter {
    /// Use the delay unchanged.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
    /// Grows from the previous sleep: `min(max, uniform(base, prev * 3))`.
    Decorrelated(DecorrelatedState),
}

impl Jitter {
    /// Full jitter.
    pub fn full() -> Self {
        Jitter::Full
    }

    /// Equal jitter.
    pub fn equal() -> Self {
        Jitter::Equal
    }

    /// Decorrelated jitter bounded by `[base, max]`.
    pub fn decorrelated(base: Duration, max: Duration) -> Result<Self, &'static str> {
        if base > max {
            return Err("decorrelated jitter requires base <= max");
        }
        Ok(Jitter::Decorrelated(DecorrelatedState {
            base,
            max,
            previous: std::sync::Mutex::new(base),
        }))
    }

    /// Randomize `delay` with the thread-local RNG.
    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    /// Randomize `delay` with a caller-supplied RNG (deterministic tests).
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis = saturating_millis(delay);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
            Jitter::Equal => {
                let millis = saturating_millis(delay);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(millis / 2..=millis))
            }
            Jitter::Decorrelated(state) => {
                let base = saturating_millis(state.base);
                let max = saturating_millis(state.max);

                let mut previous = state.previous.lock().unwrap();
                let upper = saturating_millis(*previous).saturating_mul(3).min(max);
                let lower = base.min(upper);

                let next = Duration::from_millis(rng.random_range(lower..=upper));
                *previous = next;
                next
            }
        }
    }
}

/// Millisecond conversion that saturates instead of panicking on extreme
/// durations.
fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
