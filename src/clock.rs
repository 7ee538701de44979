//! Time-source abstraction for time-based policy state.
//!
//! Circuit breakers and rate limiters consult a [`Clock`] instead of calling
//! `Instant::now()` directly, so tests can drive open delays and bucket
//! refills with a hand-cranked clock instead of real sleeps.

use std::time::Instant;

/// Thread-safe millisecond time source.
///
/// Readings are milliseconds since the implementer's own origin; only
/// differences between readings are meaningful. Readings must never decrease.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds elapsed since this clock's origin.
    fn now_millis(&self) -> u64;
}

/// Monotonic clock whose origin is the moment of construction.
///
/// Clones share the origin; independently constructed instances do not, so
/// their readings are not comparable with each other.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock anchored at `Instant::now()`.
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readings_never_decrease() {
        let clock = MonotonicClock::new();
        let mut last = clock.now_millis();
        for _ in 0..100 {
            let next = clock.now_millis();
            assert!(next >= last);
            last = next;
        }
    }

    #[test]
    fn clones_agree_on_origin() {
        let clock = MonotonicClock::new();
        let alias = clock.clone();
        thread::sleep(Duration::from_millis(5));
        assert!(clock.now_millis().abs_diff(alias.now_millis()) < 50);
    }

    #[test]
    fn usable_behind_a_trait_object() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let _ = clock.now_millis();
    }
}
