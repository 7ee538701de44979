//! Composition driver.
//!
//! An [`Executor`] holds an ordered policy list, outermost first, and runs a
//! work function through it: the list is right-folded so the first policy
//! added is the last to see the outcome. Each call gets a fresh
//! [`Execution`]; the outermost policy's outcome is the caller's outcome.

use crate::cancellation::CancelSignal;
use crate::error::PolicyError;
use crate::execution::Execution;
use crate::policy::{Inner, Outcome, Policy};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// An ordered policy stack over a typed work function.
pub struct Executor<T, E> {
    policies: Vec<Arc<dyn Policy<T, E>>>,
}

impl<T, E> Clone for Executor<T, E> {
    fn clone(&self) -> Self {
        Self { policies: self.policies.clone() }
    }
}

impl<T, E> std::fmt::Debug for Executor<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").field("policies", &self.policies.len()).finish()
    }
}

impl<T, E> Executor<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// An executor with no policies; [`Executor::get`] runs the work
    /// function directly.
    pub fn new() -> Self {
        Self { policies: Vec::new() }
    }

    /// Append a policy as the innermost layer so far. The first policy
    /// added is the outermost.
    pub fn with<P>(mut self, policy: P) -> Self
    where
        P: Policy<T, E> + 'static,
    {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Append an already-shared policy.
    pub fn with_shared(mut self, policy: Arc<dyn Policy<T, E>>) -> Self {
        self.policies.push(policy);
        self
    }

    /// Number of layers in the stack.
    pub fn depth(&self) -> usize {
        self.policies.len()
    }

    /// Run the work function through the stack, returning the outermost
    /// policy's outcome.
    pub async fn get<F, Fut>(&self, work: F) -> Outcome<T, E>
    where
        F: Fn(Execution<T, E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        self.execute(CancelSignal::new(), work).await
    }

    /// Like [`Executor::get`], with the call's cancellation rooted under a
    /// caller-owned signal: tripping `parent` cancels the in-flight call.
    pub async fn get_with_signal<F, Fut>(&self, parent: &CancelSignal, work: F) -> Outcome<T, E>
    where
        F: Fn(Execution<T, E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        self.execute(parent.child(), work).await
    }

    async fn execute<F, Fut>(&self, root: CancelSignal, work: F) -> Outcome<T, E>
    where
        F: Fn(Execution<T, E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome<T, E>> + Send + 'static,
    {
        let exec = Execution::new(root);
        let work_fn = move |e: Execution<T, E>| -> BoxFuture<'static, Outcome<T, E>> {
            Box::pin(work(e))
        };
        let chain = Inner { policies: self.policies.as_slice(), work: &work_fn };
        chain.invoke(&exec).await
    }
}

impl<E> Executor<(), E>
where
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    /// Run an error-only work function through the stack.
    pub async fn run<F, Fut>(&self, work: F) -> Result<(), PolicyError<E>>
    where
        F: Fn(Execution<(), E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PolicyError<E>>> + Send + 'static,
    {
        self.get(work).await
    }

    /// Like [`Executor::run`], rooted under a caller-owned signal.
    pub async fn run_with_signal<F, Fut>(
        &self,
        parent: &CancelSignal,
        work: F,
    ) -> Result<(), PolicyError<E>>
    where
        F: Fn(Execution<(), E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), PolicyError<E>>> + Send + 'static,
    {
        self.get_with_signal(parent, work).await
    }
}

impl<T, E> Default for Executor<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Build an executor from an ordered policy list, outermost first.
pub fn compose<T, E>(policies: impl IntoIterator<Item = Arc<dyn Policy<T, E>>>) -> Executor<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: std::error::Error + Clone + Send + Sync + 'static,
{
    Executor { policies: policies.into_iter().collect() }
}
