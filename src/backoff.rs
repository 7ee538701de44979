//! Delay schedules for retry policies.
//!
//! A schedule maps a 1-based retry index to the delay slept before that
//! retry; index 0 is the initial call and always yields zero. Exponential
//! growth uses a configurable factor (default 2.0) and every computation
//! saturates at [`MAX_DELAY`] rather than overflowing.

use std::time::Duration;

/// Ceiling applied when a computed delay would overflow (one day).
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors raised by schedule configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffError {
    /// `with_max` applies only to growing schedules.
    ConstantDoesNotSupportMax,
    /// The cap must be non-zero.
    MaxMustBePositive,
    /// The cap must not undercut the base delay.
    MaxLessThanBase {
        /// Configured base delay.
        base: Duration,
        /// Rejected cap.
        max: Duration,
    },
    /// Exponential growth factors below 1.0 would shrink, not back off.
    FactorBelowOne(f64),
}

impl std::fmt::Display for BackoffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConstantDoesNotSupportMax => {
                write!(f, "with_max applies only to linear or exponential backoff")
            }
            Self::MaxMustBePositive => write!(f, "backoff cap must be greater than zero"),
            Self::MaxLessThanBase { base, max } => {
                write!(f, "backoff cap {:?} is below the base delay {:?}", max, base)
            }
            Self::FactorBelowOne(factor) => {
                write!(f, "exponential factor must be >= 1.0 (got {})", factor)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Retry delay schedule.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// The same delay before every retry.
    Constant {
        /// Fixed delay.
        delay: Duration,
    },
    /// `base * n` before the n-th retry, optionally capped.
    Linear {
        /// Delay before the first retry.
        base: Duration,
        /// Optional ceiling.
        max: Option<Duration>,
    },
    /// `base * factor^(n-1)` before the n-th retry, optionally capped.
    Exponential {
        /// Delay before the first retry.
        base: Duration,
        /// Per-retry growth factor, >= 1.0.
        factor: f64,
        /// Optional ceiling.
        max: Option<Duration>,
    },
}

impl Backoff {
    /// No delay between retries.
    pub fn none() -> Self {
        Backoff::Constant { delay: Duration::ZERO }
    }

    /// Fixed delay between retries.
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// Linearly growing delay.
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base, max: None }
    }

    /// Doubling delay.
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, factor: 2.0, max: None }
    }

    /// Exponential delay with an explicit growth factor (must be >= 1.0).
    pub fn exponential_with_factor(base: Duration, factor: f64) -> Result<Self, BackoffError> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(BackoffError::FactorBelowOne(factor));
        }
        Ok(Backoff::Exponential { base, factor, max: None })
    }

    /// Cap the delay of a growing schedule. Rejects constant schedules, zero
    /// caps, and caps below the base delay.
    pub fn with_max(mut self, cap: Duration) -> Result<Self, BackoffError> {
        if cap.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self {
            Backoff::Linear { base, max } | Backoff::Exponential { base, max, .. } => {
                if cap < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max: cap });
                }
                *max = Some(cap);
                Ok(self)
            }
            Backoff::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay before the given retry (1-based). Index 0 is the initial call
    /// and yields zero.
    pub fn delay(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { base, max } => {
                let multiplier = u32::try_from(retry).unwrap_or(u32::MAX);
                let grown = base.checked_mul(multiplier).unwrap_or(MAX_DELAY).min(MAX_DELAY);
                max.map_or(grown, |m| grown.min(m))
            }
            Backoff::Exponential { base, factor, max } => {
                let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * factor.powi(exponent);
                let grown = if secs.is_finite() && secs < MAX_DELAY.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    MAX_DELAY
                };
                max.map_or(grown, |m| grown.min(m))
            }
        }
    }
}
