//! Dispatch inputs, asynchronous operations and their handles.
//!
//! A store accepts two kinds of input, told apart by their [`Dispatch`]
//! variant: plain actions, which travel down the pipeline to the reducer,
//! and [`Operation`]s, units of async work that an
//! [`OperationMiddleware`](crate::middleware::OperationMiddleware) hands to the
//! tokio runtime. An operation talks back to the store only by dispatching
//! ordinary actions through its [`StoreApi`].

use crate::error::StoreError;
use crate::middleware::StoreApi;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// Anything that can be fed to `Store::dispatch`
pub enum Dispatch<S, A> {
    /// A plain action, reduced by the terminal stage
    Action(A),
    /// An async unit of work, run by the operation stage
    Operation(Operation<S, A>),
}

impl<S, A> Dispatch<S, A> {
    /// The action, if this input is one
    #[must_use]
    pub const fn as_action(&self) -> Option<&A> {
        match self {
            Self::Action(action) => Some(action),
            Self::Operation(_) => None,
        }
    }

    /// Whether this input is an operation
    #[must_use]
    pub const fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }
}

impl<S, A> From<A> for Dispatch<S, A> {
    fn from(action: A) -> Self {
        Self::Action(action)
    }
}

impl<S, A> From<Operation<S, A>> for Dispatch<S, A> {
    fn from(operation: Operation<S, A>) -> Self {
        Self::Operation(operation)
    }
}

impl<S, A: fmt::Debug> fmt::Debug for Dispatch<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(action) => f.debug_tuple("Dispatch::Action").field(action).finish(),
            Self::Operation(operation) => f
                .debug_tuple("Dispatch::Operation")
                .field(&operation.name())
                .finish(),
        }
    }
}

type Work<S, A> = Box<dyn FnOnce(StoreApi<S, A>) -> BoxFuture<'static, ()> + Send>;

/// A named unit of asynchronous work
///
/// The closure receives a [`StoreApi`] for reading state and dispatching
/// follow-up actions, and returns the future to run.
///
/// # Example
///
/// ```ignore
/// let op = Operation::new("fetch_users", |api| async move {
///     let _ = api.dispatch(UsersAction::FetchUsersRequest);
///     // await the external call, then dispatch the outcome
/// });
/// store.dispatch(op)?;
/// ```
pub struct Operation<S, A> {
    name: &'static str,
    work: Work<S, A>,
}

impl<S, A> Operation<S, A> {
    /// Wrap `work` as an operation called `name`
    pub fn new<F, Fut>(name: &'static str, work: F) -> Self
    where
        S: 'static,
        A: 'static,
        F: FnOnce(StoreApi<S, A>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name,
            work: Box::new(move |api| -> BoxFuture<'static, ()> { Box::pin(work(api)) }),
        }
    }

    /// The operation's name, used in logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Start the work, producing its future
    pub(crate) fn start(self, api: StoreApi<S, A>) -> BoxFuture<'static, ()> {
        (self.work)(api)
    }
}

impl<S, A> fmt::Debug for Operation<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// What the pipeline did with a dispatched input
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The action reached the reducer and the result was committed
    Reduced,
    /// The operation was spawned; the handle tracks its completion
    Spawned(OperationHandle),
    /// A middleware stage stopped the input before the reducer
    Intercepted,
}

impl DispatchOutcome {
    /// Whether the input was committed by the reducer
    #[must_use]
    pub const fn is_reduced(&self) -> bool {
        matches!(self, Self::Reduced)
    }

    /// The operation handle, if an operation was spawned
    #[must_use]
    pub fn into_handle(self) -> Option<OperationHandle> {
        match self {
            Self::Spawned(handle) => Some(handle),
            Self::Reduced | Self::Intercepted => None,
        }
    }
}

/// Handle for tracking a spawned operation
///
/// Returned inside [`DispatchOutcome::Spawned`]. Cloning is cheap; every clone
/// observes the same completion.
///
/// # Example
///
/// ```ignore
/// let handle = store.dispatch(fetch_users(source))?.into_handle();
/// if let Some(mut handle) = handle {
///     handle.wait_with_timeout(Duration::from_secs(5)).await?;
/// }
/// ```
#[derive(Clone)]
pub struct OperationHandle {
    name: &'static str,
    completion: watch::Receiver<bool>,
    abort: Option<AbortHandle>,
}

impl OperationHandle {
    /// Create a handle plus the guard that marks completion when dropped
    pub(crate) fn new(name: &'static str) -> (Self, CompletionGuard) {
        let (tx, rx) = watch::channel(false);
        let handle = Self {
            name,
            completion: rx,
            abort: None,
        };
        (handle, CompletionGuard(tx))
    }

    pub(crate) fn attach(&mut self, abort: AbortHandle) {
        self.abort = Some(abort);
    }

    /// The operation's name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the operation has finished (completed, timed out or aborted)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.completion.borrow()
    }

    /// Wait for the operation to finish
    pub async fn wait(&mut self) {
        // An error means the guard is gone, which only happens after it signalled
        let _ = self.completion.wait_for(|done| *done).await;
    }

    /// Wait for the operation to finish, giving up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the operation is still running when
    /// the timeout expires. The operation itself keeps running.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }

    /// Cancel the operation
    ///
    /// Actions it already dispatched stay committed. Calling this on a
    /// finished operation has no effect.
    pub fn abort(&self) {
        if let Some(abort) = &self.abort {
            tracing::debug!(operation = self.name, "Aborting operation");
            abort.abort();
        }
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("name", &self.name)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// Internal: marks the operation finished when dropped
///
/// Lives inside the spawned task, so completion is signalled whether the
/// future finishes, times out, panics or is aborted.
pub(crate) struct CompletionGuard(watch::Sender<bool>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}
