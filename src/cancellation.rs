//! Cooperative cancellation signals.
//!
//! A [`CancelSignal`] is a one-shot flag with a reason. Signals form a tree:
//! tripping a signal also trips every child derived from it, while siblings
//! and ancestors stay live. The retry layer installs a fresh child per
//! attempt so that a timeout inside one attempt does not poison the next.
//!
//! Built on `tokio_util`'s `CancellationToken` so suspension points can
//! `select!` on [`CancelSignal::cancelled`] and wake promptly.

use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;

/// Why a signal tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// A timeout layer expired.
    TimeoutExceeded,
    /// An enclosing signal tripped without a recorded reason of its own.
    ParentCanceled,
    /// The caller aborted the execution.
    UserAborted,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeoutExceeded => write!(f, "timeout exceeded"),
            Self::ParentCanceled => write!(f, "parent canceled"),
            Self::UserAborted => write!(f, "user aborted"),
        }
    }
}

#[derive(Debug)]
struct SignalNode {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
    parent: Option<Arc<SignalNode>>,
}

/// One-shot cancellation flag with chain-trip semantics.
///
/// Cloning shares the underlying flag; [`CancelSignal::child`] derives a new
/// signal that trips whenever this one does.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    node: Arc<SignalNode>,
}

impl CancelSignal {
    /// Create a root signal.
    pub fn new() -> Self {
        Self {
            node: Arc::new(SignalNode {
                token: CancellationToken::new(),
                reason: OnceLock::new(),
                parent: None,
            }),
        }
    }

    /// Derive a child signal. Tripping `self` trips the child; tripping the
    /// child leaves `self` untouched.
    pub fn child(&self) -> Self {
        Self {
            node: Arc::new(SignalNode {
                token: self.node.token.child_token(),
                reason: OnceLock::new(),
                parent: Some(self.node.clone()),
            }),
        }
    }

    /// Trip the signal. The first reason wins; later trips are no-ops.
    /// Returns whether this call set the flag.
    pub fn trip(&self, reason: CancelReason) -> bool {
        let set = self.node.reason.set(reason).is_ok();
        self.node.token.cancel();
        set
    }

    /// Whether the signal (or any ancestor) has tripped.
    pub fn is_tripped(&self) -> bool {
        self.node.token.is_cancelled()
    }

    /// The reason observed at this signal, walking up to the tripping
    /// ancestor when the trip arrived through the chain. Returns
    /// [`CancelReason::ParentCanceled`] if the chain tripped without a
    /// recorded reason, and `None` while the signal is live.
    pub fn reason(&self) -> Option<CancelReason> {
        if !self.is_tripped() {
            return None;
        }
        let mut node = Some(&self.node);
        while let Some(n) = node {
            if let Some(reason) = n.reason.get() {
                return Some(*reason);
            }
            node = n.parent.as_ref();
        }
        Some(CancelReason::ParentCanceled)
    }

    /// Resolve once the signal trips. Used by suspension points to wake.
    pub async fn cancelled(&self) {
        self.node.token.cancelled().await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}
