//! Error types shared by every policy layer.
//!
//! `PolicyError` is the single error currency of the engine: user failures
//! travel as [`PolicyError::Inner`], while each policy contributes its own
//! sentinel variant when it refuses or cuts short an execution. Sentinels are
//! distinguishable by variant identity; use the `is_*` predicates rather than
//! string matching.

use crate::cancellation::CancelReason;
use std::fmt;
use std::time::Duration;

/// Unified error type threaded through a policy stack.
#[derive(Debug, Clone)]
pub enum PolicyError<E> {
    /// A timeout layer expired before its inner chain completed.
    Timeout {
        /// Time spent before the layer gave up.
        elapsed: Duration,
        /// The configured limit.
        limit: Duration,
    },
    /// A circuit breaker short-circuited the call while open.
    CircuitOpen {
        /// Failures recorded by the breaker at refusal time.
        failure_count: u64,
    },
    /// A rate limiter refused admission.
    RateLimited {
        /// Time until the next permit becomes available, when known.
        retry_after: Option<Duration>,
    },
    /// A bulkhead had no free permit.
    BulkheadFull {
        /// Permits in use at refusal time.
        in_flight: usize,
        /// Total permit count.
        max: usize,
    },
    /// The execution was canceled through the cancellation signal.
    Canceled {
        /// Why the signal tripped.
        reason: CancelReason,
    },
    /// The user work function failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for PolicyError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { elapsed, limit } => {
                write!(f, "timed out after {:?} (limit {:?})", elapsed, limit)
            }
            Self::CircuitOpen { failure_count } => {
                write!(f, "circuit breaker open ({} recorded failures)", failure_count)
            }
            Self::RateLimited { retry_after: Some(wait) } => {
                write!(f, "rate limit exceeded (retry after {:?})", wait)
            }
            Self::RateLimited { retry_after: None } => write!(f, "rate limit exceeded"),
            Self::BulkheadFull { in_flight, max } => {
                write!(f, "bulkhead full ({} of {} permits in use)", in_flight, max)
            }
            Self::Canceled { reason } => write!(f, "execution canceled: {}", reason),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PolicyError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> PolicyError<E> {
    /// True for [`PolicyError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True for [`PolicyError::CircuitOpen`].
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// True for [`PolicyError::RateLimited`].
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// True for [`PolicyError::BulkheadFull`].
    pub fn is_bulkhead_full(&self) -> bool {
        matches!(self, Self::BulkheadFull { .. })
    }

    /// True for [`PolicyError::Canceled`].
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    /// True when this wraps a user error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    /// Borrow the user error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Consume self, yielding the user error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }

    /// Elapsed/limit pair for a timeout error.
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, limit } => Some((*elapsed, *limit)),
            _ => None,
        }
    }

    /// `(in_flight, max)` for a bulkhead refusal.
    pub fn bulkhead_capacity(&self) -> Option<(usize, usize)> {
        match self {
            Self::BulkheadFull { in_flight, max } => Some((*in_flight, *max)),
            _ => None,
        }
    }

    /// Suggested wait for a rate-limit refusal, when the limiter knew one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The cancellation reason, for canceled executions.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Canceled { reason } => Some(*reason),
            _ => None,
        }
    }
}
