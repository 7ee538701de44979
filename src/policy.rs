//! The policy executor contract.
//!
//! Every policy implements [`Policy::apply`]: given the [`Execution`] and a
//! handle to the rest of the stack, produce this layer's outcome. A policy
//! may refuse admission without touching the handle (short-circuit), invoke
//! it once (timeout, breaker, fallback), or invoke it many times (retry).
//!
//! [`Inner::invoke`] is where the engine's bookkeeping lives: each call bumps
//! the execution number and records the returned outcome in the Execution's
//! last-result/last-error slots before handing it back to the policy.

use crate::error::PolicyError;
use crate::execution::Execution;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// What a policy layer resolves to.
pub type Outcome<T, E> = Result<T, PolicyError<E>>;

/// The user work function, boxed once by the composition driver.
pub(crate) type Work<T, E> =
    dyn Fn(Execution<T, E>) -> BoxFuture<'static, Outcome<T, E>> + Send + Sync;

/// A decision module wrapping an inner execution.
#[async_trait]
pub trait Policy<T, E>: Send + Sync {
    /// Run this layer around `inner`, resolving to the layer's outcome.
    async fn apply(&self, exec: &Execution<T, E>, inner: Inner<'_, T, E>) -> Outcome<T, E>;
}

/// Re-invokable handle to the remainder of the stack below a policy.
pub struct Inner<'a, T, E> {
    pub(crate) policies: &'a [Arc<dyn Policy<T, E>>],
    pub(crate) work: &'a Work<T, E>,
}

impl<'a, T, E> Clone for Inner<'a, T, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T, E> Copy for Inner<'a, T, E> {}

impl<'a, T, E> Inner<'a, T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// Run the rest of the stack once. Each call is one inner-layer
    /// re-entry: the execution number is bumped before descending and the
    /// outcome is recorded on the Execution before returning.
    pub fn invoke<'b>(&self, exec: &'b Execution<T, E>) -> BoxFuture<'b, Outcome<T, E>>
    where
        'a: 'b,
    {
        let Inner { policies, work } = *self;
        Box::pin(async move {
            exec.note_reentry();
            let outcome = match policies.split_first() {
                None => (work)(exec.clone()).await,
                Some((head, rest)) => head.apply(exec, Inner { policies: rest, work }).await,
            };
            exec.record_outcome(&outcome);
            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancelSignal;
    use std::fmt;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(&'static str);

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn boxed_work(
        value: Outcome<u32, TestError>,
    ) -> impl Fn(Execution<u32, TestError>) -> BoxFuture<'static, Outcome<u32, TestError>> {
        move |_exec| -> BoxFuture<'static, Outcome<u32, TestError>> {
            let value = value.clone();
            Box::pin(async move { value })
        }
    }

    #[tokio::test]
    async fn empty_chain_reaches_the_work_function() {
        let exec = Execution::new(CancelSignal::new());
        let work = boxed_work(Ok(42));
        let chain: Vec<Arc<dyn Policy<u32, TestError>>> = Vec::new();

        let inner = Inner { policies: &chain, work: &work };
        let outcome = inner.invoke(&exec).await;

        assert_eq!(outcome.unwrap(), 42);
        assert_eq!(exec.executions(), 1);
        assert_eq!(exec.last_result(), Some(42));
    }

    #[tokio::test]
    async fn each_invocation_counts_as_a_reentry() {
        let exec = Execution::new(CancelSignal::new());
        let work = boxed_work(Err(PolicyError::Inner(TestError("nope"))));
        let chain: Vec<Arc<dyn Policy<u32, TestError>>> = Vec::new();
        let inner = Inner { policies: &chain, work: &work };

        for expected in 1..=3 {
            let outcome = inner.invoke(&exec).await;
            assert!(outcome.is_err());
            assert_eq!(exec.executions(), expected);
        }
        assert!(exec.last_error().unwrap().is_inner());
    }

    struct PassThrough;

    #[async_trait]
    impl Policy<u32, TestError> for PassThrough {
        async fn apply(
            &self,
            exec: &Execution<u32, TestError>,
            inner: Inner<'_, u32, TestError>,
        ) -> Outcome<u32, TestError> {
            inner.invoke(exec).await
        }
    }

    #[tokio::test]
    async fn stacked_layers_each_count_their_reentry() {
        let exec = Execution::new(CancelSignal::new());
        let work = boxed_work(Ok(7));
        let chain: Vec<Arc<dyn Policy<u32, TestError>>> =
            vec![Arc::new(PassThrough), Arc::new(PassThrough)];

        let inner = Inner { policies: &chain, work: &work };
        let outcome = inner.invoke(&exec).await;

        assert_eq!(outcome.unwrap(), 7);
        // Root entry plus one re-entry per layer.
        assert_eq!(exec.executions(), 3);
    }
}
