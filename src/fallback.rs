//! Fallback policy.
//!
//! Consumes inner failures: on success the value passes through untouched;
//! on failure a substitute outcome is produced, either a constant value or
//! the result of a handler that inspects the [`Execution`] (whose last-error
//! slot holds the failure being replaced). Policies above a fallback see
//! success unless the handler itself fails.

use crate::events::{emit, Listeners};
use crate::execution::Execution;
use crate::policy::{Inner, Outcome, Policy};
use async_trait::async_trait;
use std::sync::Arc;

type Handler<T, E> = Arc<dyn Fn(&Execution<T, E>) -> Outcome<T, E> + Send + Sync>;

enum Substitute<T, E> {
    Value(T),
    Handler(Handler<T, E>),
}

impl<T: Clone, E> Clone for Substitute<T, E> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(v) => Self::Value(v.clone()),
            Self::Handler(h) => Self::Handler(h.clone()),
        }
    }
}

/// Substituting wrapper around an inner policy chain.
#[derive(Clone)]
pub struct FallbackPolicy<T, E> {
    substitute: Substitute<T, E>,
    listeners: Listeners<T, E>,
}

impl<T, E> std::fmt::Debug for FallbackPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.substitute {
            Substitute::Value(_) => "value",
            Substitute::Handler(_) => "handler",
        };
        f.debug_struct("FallbackPolicy").field("substitute", &kind).finish()
    }
}

impl<T, E> FallbackPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// Substitute a constant value for any inner failure.
    pub fn value(value: T) -> Self {
        Self { substitute: Substitute::Value(value), listeners: Listeners::none() }
    }

    /// Substitute the handler's outcome for any inner failure. The handler
    /// sees the Execution with its last-error slot populated.
    pub fn handler<F>(handler: F) -> Self
    where
        F: Fn(&Execution<T, E>) -> Outcome<T, E> + Send + Sync + 'static,
    {
        Self { substitute: Substitute::Handler(Arc::new(handler)), listeners: Listeners::none() }
    }

    /// Observe this layer resolving successfully, substituted or not.
    pub fn on_success<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.success = Some(Arc::new(listener));
        self
    }

    /// Observe the handler itself failing.
    pub fn on_failure<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Execution<T, E>) + Send + Sync + 'static,
    {
        self.listeners.failure = Some(Arc::new(listener));
        self
    }
}

#[async_trait]
impl<T, E> Policy<T, E> for FallbackPolicy<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    async fn apply(&self, exec: &Execution<T, E>, inner: Inner<'_, T, E>) -> Outcome<T, E> {
        match inner.invoke(exec).await {
            Ok(value) => {
                emit(&self.listeners.success, exec);
                Ok(value)
            }
            Err(_consumed) => {
                tracing::debug!("inner chain failed; substituting fallback outcome");
                let substituted = match &self.substitute {
                    Substitute::Value(value) => Ok(value.clone()),
                    Substitute::Handler(handler) => handler(exec),
                };
                match &substituted {
                    Ok(_) => emit(&self.listeners.success, exec),
                    Err(_) => emit(&self.listeners.failure, exec),
                }
                substituted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyError;
    use crate::executor::Executor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[tokio::test]
    async fn success_passes_through_unchanged() {
        let executor = Executor::new().with(FallbackPolicy::value(0u32));
        let result: Outcome<u32, TestError> = executor.get(|_exec| async move { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn constant_value_replaces_any_failure() {
        let executor = Executor::new().with(FallbackPolicy::value(13u32));

        for _ in 0..3 {
            let result: Outcome<u32, TestError> = executor
                .get(|_exec| async move { Err(PolicyError::Inner(TestError("boom"))) })
                .await;
            assert_eq!(result.unwrap(), 13, "same substitute regardless of the error");
        }
    }

    #[tokio::test]
    async fn handler_sees_the_recorded_error() {
        let fallback = FallbackPolicy::handler(|exec: &Execution<u32, TestError>| {
            let last = exec.last_error().expect("failure recorded before the handler runs");
            assert_eq!(last.as_inner().unwrap().0, "original");
            Ok(21)
        });
        let executor = Executor::new().with(fallback);

        let result: Outcome<u32, TestError> = executor
            .get(|_exec| async move { Err(PolicyError::Inner(TestError("original"))) })
            .await;
        assert_eq!(result.unwrap(), 21);
    }

    #[tokio::test]
    async fn failing_handler_surfaces_its_own_error() {
        let fallback = FallbackPolicy::handler(|_exec: &Execution<u32, TestError>| {
            Err(PolicyError::Inner(TestError("handler failed")))
        });
        let executor = Executor::new().with(fallback);

        let result: Outcome<u32, TestError> = executor
            .get(|_exec| async move { Err(PolicyError::Inner(TestError("original"))) })
            .await;
        assert_eq!(result.unwrap_err().into_inner().unwrap().0, "handler failed");
    }

    #[tokio::test]
    async fn handler_is_not_consulted_on_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_handler = calls.clone();
        let fallback = FallbackPolicy::handler(move |_exec: &Execution<u32, TestError>| {
            calls_in_handler.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });
        let executor = Executor::new().with(fallback);

        let result: Outcome<u32, TestError> = executor.get(|_exec| async move { Ok(3) }).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
