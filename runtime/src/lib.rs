//! # Reflux Runtime
//!
//! Runtime implementation for the Reflux state container.
//!
//! This crate provides the [`Store`]: the single owner of the current state,
//! the middleware pipeline every dispatch walks through, and the subscriber
//! list notified after each committed transition.
//!
//! ## Core Components
//!
//! - **Store**: Holds state, dispatches, notifies subscribers
//! - **Middleware**: Ordered stages between `dispatch` and the reducer
//! - **Operations**: Async units of work that dispatch plain actions as they progress
//!
//! ## Flow
//!
//! ```text
//! dispatch(input) → stage 1 → stage 2 → … → reducer → commit → subscribers
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use reflux_runtime::{Store, middleware::{LoggerMiddleware, OperationMiddleware}};
//!
//! let store = Store::builder(root_reducer)
//!     .middleware(LoggerMiddleware::new())
//!     .middleware(OperationMiddleware::new())
//!     .build();
//!
//! let subscription = store.subscribe(|| println!("state changed"));
//! store.dispatch(ShopAction::BuyCake)?;
//! subscription.unsubscribe();
//! ```

use reflux_core::{action::Action, reducer::Reducer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Metric names recorded by the store
pub mod metrics;

/// The middleware pipeline and the built-in stages
pub mod middleware;

/// Dispatch inputs, async operations and their handles
pub mod operation;

use middleware::StoreCore;
pub use middleware::{LoggerMiddleware, Middleware, Next, OperationMiddleware, StoreApi};
pub use operation::{Dispatch, DispatchOutcome, Operation, OperationHandle};

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// A middleware stage failed
        ///
        /// Raised by the stage itself; the store never catches it, so the
        /// dispatch stops and the state is left as it was.
        #[error("Middleware `{stage}` failed: {source}")]
        Middleware {
            /// Name of the failing stage
            stage: &'static str,
            /// Underlying failure
            #[source]
            source: anyhow::Error,
        },

        /// An operation reached the reducer
        ///
        /// Operations are only understood by an operation stage; without one
        /// registered, they cannot be reduced.
        #[error("Operation `{0}` reached the reducer; register OperationMiddleware to run operations")]
        UnhandledOperation(&'static str),

        /// An operation was dispatched outside a tokio runtime
        #[error("Operations require a running tokio runtime")]
        NoRuntime,

        /// Store is shutting down and not accepting new operations
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for operations to complete
        #[error("Shutdown timed out with {0} operations still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for an operation
        #[error("Timeout waiting for operation")]
        Timeout,
    }

    impl StoreError {
        /// Wrap a stage failure
        pub fn middleware(stage: &'static str, source: impl Into<anyhow::Error>) -> Self {
            Self::Middleware {
                stage,
                source: source.into(),
            }
        }
    }
}

pub use error::StoreError;

/// Store configuration
///
/// # Example
///
/// ```
/// use reflux_runtime::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_operation_timeout(Duration::from_secs(10))
///     .with_notify_unchanged(false);
/// assert_eq!(config.operation_timeout, Some(Duration::from_secs(10)));
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on each operation's run time (`None`: unbounded)
    pub operation_timeout: Option<Duration>,
    /// Notify subscribers even when the reducer returned the same state
    pub notify_unchanged: bool,
}

impl StoreConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub const fn new(operation_timeout: Option<Duration>, notify_unchanged: bool) -> Self {
        Self {
            operation_timeout,
            notify_unchanged,
        }
    }

    /// Bound every operation's run time
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Choose whether unchanged states still notify subscribers
    #[must_use]
    pub const fn with_notify_unchanged(mut self, notify: bool) -> Self {
        self.notify_unchanged = notify;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout: None,
            notify_unchanged: true,
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// Every guarded value is replaced whole, so it is consistent even after a panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Internal: registered listeners in registration order
#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

impl Subscribers {
    fn insert(&mut self, listener: Listener) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    fn snapshot(&self) -> Vec<Listener> {
        self.entries.iter().map(|(_, listener)| Arc::clone(listener)).collect()
    }
}

/// Capability to remove one listener, returned by [`Store::subscribe`]
///
/// Dropping it leaves the listener registered.
#[must_use = "dropping a Subscription keeps the listener registered without a way to remove it"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Subscribers>>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the listener
    ///
    /// Idempotent: only the first call has an effect, later calls return
    /// immediately. Safe to call after the store is gone.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(registry) = self.registry.upgrade() {
            if lock(&registry).remove(self.id) {
                metrics::gauge!(metrics::SUBSCRIBERS_ACTIVE).decrement(1.0);
                tracing::trace!(subscription = self.id, "Listener removed");
            }
        }
    }

    /// Whether `unsubscribe` has not been called yet
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Guard that decrements an atomic counter on drop (for shutdown tracking)
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!(metrics::OPERATIONS_PENDING).decrement(1.0);
    }
}

/// Store module - The runtime for reducers
pub mod store {
    use super::{
        Action, Arc, AtomicBool, AtomicUsize, Dispatch, DispatchOutcome, Duration, Instant,
        Listener, Middleware, Mutex, Next, Operation, OperationHandle, Ordering, PendingGuard,
        Reducer, StoreApi, StoreConfig, StoreCore, StoreError, Subscribers, Subscription, lock,
        metrics,
    };

    type Stage<R> = Arc<dyn Middleware<<R as Reducer>::State, <R as Reducer>::Action>>;

    /// The Store - holder of the current state
    ///
    /// The Store manages:
    /// 1. State (an `Arc` replaced on every committed transition)
    /// 2. Reducer (the transition function)
    /// 3. Middleware (fixed at construction, run in registration order)
    /// 4. Subscribers (notified synchronously after each commit)
    ///
    /// Cloning a `Store` gives another handle to the same state.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = Store::new(CakeReducer);
    ///
    /// store.dispatch(CakeAction::BuyCake)?;
    /// assert_eq!(store.state(|s| s.num_of_cakes), 9);
    /// ```
    pub struct Store<R: Reducer> {
        inner: Arc<StoreInner<R>>,
    }

    struct StoreInner<R: Reducer> {
        reducer: R,
        /// Held only while the reducer computes and commits the next state
        state: Mutex<Arc<R::State>>,
        subscribers: Arc<Mutex<Subscribers>>,
        middleware: Vec<Stage<R>>,
        config: StoreConfig,
        shutdown: AtomicBool,
        pending_operations: Arc<AtomicUsize>,
    }

    impl<R: Reducer> Store<R> {
        /// Create a store whose initial state comes from the reducer
        ///
        /// No middleware is registered; use [`Store::builder`] for that.
        #[must_use]
        pub fn new(reducer: R) -> Self {
            Self::builder(reducer).build()
        }

        /// Create a store starting from `state` instead of the reducer's default
        ///
        /// The reducer completes the state first (see [`Reducer::preload`]);
        /// a composite missing some slices gets their initial values.
        #[must_use]
        pub fn with_state(reducer: R, state: R::State) -> Self {
            Self::builder(reducer).preloaded_state(state).build()
        }

        /// Create a store with custom configuration
        #[must_use]
        pub fn with_config(reducer: R, config: StoreConfig) -> Self {
            Self::builder(reducer).config(config).build()
        }

        /// Start configuring a store
        #[must_use]
        pub fn builder(reducer: R) -> StoreBuilder<R> {
            StoreBuilder {
                reducer,
                preloaded_state: None,
                middleware: Vec::new(),
                config: StoreConfig::default(),
            }
        }

        /// The current state
        ///
        /// Cheap: clones the `Arc`, never the state.
        #[must_use]
        pub fn get_state(&self) -> Arc<R::State> {
            self.inner.current_state()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let cakes = store.state(|s| s.num_of_cakes);
        /// ```
        pub fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&R::State) -> T,
        {
            f(&self.inner.current_state())
        }

        /// Dispatch an action or an operation
        ///
        /// The input walks the middleware stages in registration order. A
        /// plain action that reaches the end is reduced, the result is
        /// committed, and every subscriber is called before this returns.
        ///
        /// # Returns
        ///
        /// What the pipeline did with the input, see [`DispatchOutcome`].
        ///
        /// # Errors
        ///
        /// - [`StoreError::Middleware`]: a stage failed
        /// - [`StoreError::UnhandledOperation`]: an operation reached the reducer
        /// - [`StoreError::NoRuntime`] / [`StoreError::ShutdownInProgress`]: an
        ///   operation could not be spawned
        ///
        /// # Concurrency
        ///
        /// Only reduce-and-commit is atomic: concurrent dispatches never lose
        /// an update, and each reducer call sees the state committed just
        /// before it. The rest of the dispatch is not serialized, so listeners
        /// and middleware may run while another thread commits. On a
        /// multi-thread runtime two notification passes can interleave or
        /// finish out of commit order, and a stage reading the state before
        /// and after `next` (such as [`LoggerMiddleware`](crate::LoggerMiddleware))
        /// may see another thread's commit in between. Listeners that need
        /// the latest value should read it with `get_state` rather than assume
        /// one pass per commit in order.
        ///
        /// # Panics
        ///
        /// A panicking reducer or listener unwinds through this call. A
        /// reducer panic leaves the state as it was.
        #[tracing::instrument(skip_all, name = "store_dispatch")]
        pub fn dispatch(
            &self,
            input: impl Into<Dispatch<R::State, R::Action>>,
        ) -> Result<DispatchOutcome, StoreError> {
            Arc::clone(&self.inner).dispatch_input(input.into())
        }

        /// Register a listener called after every committed transition
        ///
        /// Listeners run synchronously inside `dispatch`, in registration
        /// order. They may read state, dispatch, subscribe and unsubscribe;
        /// changes to the listener list take effect from the next dispatch.
        pub fn subscribe<F>(&self, listener: F) -> Subscription
        where
            F: Fn() + Send + Sync + 'static,
        {
            let listener: Listener = Arc::new(listener);
            let id = lock(&self.inner.subscribers).insert(listener);
            metrics::gauge!(metrics::SUBSCRIBERS_ACTIVE).increment(1.0);
            tracing::trace!(subscription = id, "Listener registered");

            Subscription {
                id,
                registry: Arc::downgrade(&self.inner.subscribers),
                active: AtomicBool::new(true),
            }
        }

        /// Number of registered listeners
        #[must_use]
        pub fn subscriber_count(&self) -> usize {
            lock(&self.inner.subscribers).entries.len()
        }

        /// Number of operations still running
        #[must_use]
        pub fn pending_operations(&self) -> usize {
            self.inner.pending_operations.load(Ordering::Acquire)
        }

        /// The read/dispatch capability handed to middleware and operations
        #[must_use]
        pub fn api(&self) -> StoreApi<R::State, R::Action> {
            StoreApi::new(Arc::clone(&self.inner) as Arc<dyn StoreCore<_, _>>)
        }

        /// The configuration this store was built with
        #[must_use]
        pub fn config(&self) -> &StoreConfig {
            &self.inner.config
        }

        /// Initiate graceful shutdown of the store
        ///
        /// This method:
        /// 1. Sets the shutdown flag (rejecting new operations)
        /// 2. Waits for running operations to complete (with timeout)
        ///
        /// Plain actions are still reduced, so running operations can
        /// dispatch their outcomes.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires
        /// before all operations complete.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            self.inner.shutdown.store(true, Ordering::Release);

            let start = Instant::now();
            let poll_interval = Duration::from_millis(10);

            loop {
                let pending = self.pending_operations();

                if pending == 0 {
                    tracing::info!("All operations completed, shutdown successful");
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::error!(
                        pending_operations = pending,
                        "Shutdown timeout: {} operations still running", pending
                    );
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tracing::debug!(
                    pending_operations = pending,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Waiting for operations to complete"
                );

                tokio::time::sleep(poll_interval).await;
            }
        }
    }

    impl<R: Reducer> Clone for Store<R> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<R> std::fmt::Debug for Store<R>
    where
        R: Reducer,
        R::State: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Store")
                .field("state", &self.get_state())
                .field("middleware", &self.inner.middleware.len())
                .field("subscribers", &self.subscriber_count())
                .finish_non_exhaustive()
        }
    }

    impl<R: Reducer> StoreInner<R> {
        /// Terminal stage: reduce, commit, notify
        fn reduce_and_notify(
            &self,
            input: Dispatch<R::State, R::Action>,
        ) -> Result<DispatchOutcome, StoreError> {
            let action = match input {
                Dispatch::Action(action) => action,
                Dispatch::Operation(operation) => {
                    tracing::warn!(
                        operation = operation.name(),
                        "Rejected operation: no operation middleware registered"
                    );
                    return Err(StoreError::UnhandledOperation(operation.name()));
                },
            };

            let changed = {
                let mut state = lock(&self.state);

                let span = tracing::debug_span!(
                    "reducer_execution",
                    action_type = action.action_type()
                );
                let _enter = span.enter();

                let start = Instant::now();
                let next = self.reducer.reduce(&state, &action);
                metrics::histogram!(metrics::REDUCER_DURATION_SECONDS)
                    .record(start.elapsed().as_secs_f64());

                let changed = !Arc::ptr_eq(&next, &*state);
                *state = next;
                changed
            };
            tracing::trace!(changed, "Committed next state");

            if changed || self.config.notify_unchanged {
                self.notify();
            }

            Ok(DispatchOutcome::Reduced)
        }

        /// Call every listener registered at this moment
        fn notify(&self) {
            let listeners = lock(&self.subscribers).snapshot();
            tracing::trace!("Notifying {} listeners", listeners.len());

            for listener in &listeners {
                listener();
            }

            metrics::counter!(metrics::SUBSCRIBERS_NOTIFIED_TOTAL).increment(listeners.len() as u64);
        }
    }

    impl<R: Reducer> StoreCore<R::State, R::Action> for StoreInner<R> {
        fn current_state(&self) -> Arc<R::State> {
            Arc::clone(&lock(&self.state))
        }

        fn dispatch_input(
            self: Arc<Self>,
            input: Dispatch<R::State, R::Action>,
        ) -> Result<DispatchOutcome, StoreError> {
            metrics::counter!(metrics::DISPATCH_TOTAL).increment(1);
            tracing::debug!(input = ?input, "Processing dispatch");

            let api = StoreApi::new(Arc::clone(&self) as Arc<dyn StoreCore<_, _>>);
            let terminal = |input: Dispatch<R::State, R::Action>| self.reduce_and_notify(input);

            Next::new(&self.middleware, &api, &terminal).run(input)
        }

        fn spawn_operation(
            self: Arc<Self>,
            operation: Operation<R::State, R::Action>,
        ) -> Result<OperationHandle, StoreError> {
            let name = operation.name();

            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!(operation = name, "Rejected operation: store is shutting down");
                metrics::counter!(metrics::DISPATCH_REJECTED_TOTAL).increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            let runtime =
                tokio::runtime::Handle::try_current().map_err(|_| StoreError::NoRuntime)?;

            let (mut handle, completion) = OperationHandle::new(name);

            self.pending_operations.fetch_add(1, Ordering::SeqCst);
            metrics::gauge!(metrics::OPERATIONS_PENDING).increment(1.0);
            let pending_guard = PendingGuard(Arc::clone(&self.pending_operations));

            let timeout = self.config.operation_timeout;
            let api = StoreApi::new(Arc::clone(&self) as Arc<dyn StoreCore<_, _>>);
            let work = operation.start(api);

            let task = runtime.spawn(async move {
                let _completion = completion;
                let _pending_guard = pending_guard; // Decrement on drop

                match timeout {
                    Some(limit) => {
                        if tokio::time::timeout(limit, work).await.is_err() {
                            metrics::counter!(metrics::OPERATIONS_TIMED_OUT_TOTAL).increment(1);
                            tracing::warn!(
                                operation = name,
                                timeout_ms = limit.as_millis(),
                                "Operation timed out"
                            );
                        }
                    },
                    None => work.await,
                }

                tracing::trace!(operation = name, "Operation finished");
            });

            handle.attach(task.abort_handle());
            metrics::counter!(metrics::OPERATIONS_SPAWNED_TOTAL).increment(1);

            Ok(handle)
        }
    }

    /// Builder for a [`Store`], returned by [`Store::builder`]
    pub struct StoreBuilder<R: Reducer> {
        reducer: R,
        preloaded_state: Option<R::State>,
        middleware: Vec<Stage<R>>,
        config: StoreConfig,
    }

    impl<R: Reducer> StoreBuilder<R> {
        /// Start from `state` instead of the reducer's initial state
        ///
        /// `build` hands it to [`Reducer::preload`].
        #[must_use]
        pub fn preloaded_state(mut self, state: R::State) -> Self {
            self.preloaded_state = Some(state);
            self
        }

        /// Append a middleware stage; stages run in the order they are added
        #[must_use]
        pub fn middleware<M>(mut self, stage: M) -> Self
        where
            M: Middleware<R::State, R::Action>,
        {
            self.middleware.push(Arc::new(stage));
            self
        }

        /// Set the store configuration
        #[must_use]
        pub fn config(mut self, config: StoreConfig) -> Self {
            self.config = config;
            self
        }

        /// Build the store, establishing the initial state
        #[must_use]
        pub fn build(self) -> Store<R> {
            let state = match self.preloaded_state {
                Some(state) => self.reducer.preload(state),
                None => self.reducer.init(),
            };

            tracing::debug!(
                stages = self.middleware.len(),
                stage_names = ?self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>(),
                "Store created"
            );

            Store {
                inner: Arc::new(StoreInner {
                    reducer: self.reducer,
                    state: Mutex::new(state),
                    subscribers: Arc::new(Mutex::new(Subscribers::default())),
                    middleware: self.middleware,
                    config: self.config,
                    shutdown: AtomicBool::new(false),
                    pending_operations: Arc::new(AtomicUsize::new(0)),
                }),
            }
        }
    }
}

// Re-export for convenience
pub use store::{Store, StoreBuilder};

// Test module
#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

    use super::*;
    use reflux_core::reducer::next_state;

    // Test state
    #[derive(Debug, Clone, PartialEq)]
    struct TestState {
        value: i32,
    }

    // Test action
    #[derive(Debug, Clone)]
    enum TestAction {
        Increment,
        Decrement,
        NoOp,
        Explode,
    }

    impl Action for TestAction {
        fn action_type(&self) -> &'static str {
            match self {
                Self::Increment => "INCREMENT",
                Self::Decrement => "DECREMENT",
                Self::NoOp => "NOOP",
                Self::Explode => "EXPLODE",
            }
        }
    }

    // Test reducer
    #[derive(Debug, Clone)]
    struct TestReducer;

    impl Reducer for TestReducer {
        type State = TestState;
        type Action = TestAction;

        fn initial_state(&self) -> TestState {
            TestState { value: 10 }
        }

        fn reduce(&self, state: &Arc<TestState>, action: &TestAction) -> Arc<TestState> {
            match action {
                TestAction::Increment => next_state(state, |s| s.value += 1),
                TestAction::Decrement => next_state(state, |s| s.value -= 1),
                TestAction::NoOp => Arc::clone(state),
                TestAction::Explode => panic!("Intentional panic in reducer for testing"),
            }
        }
    }

    type TestApi = StoreApi<TestState, TestAction>;
    type TestNext<'a> = Next<'a, TestState, TestAction>;
    type TestInput = Dispatch<TestState, TestAction>;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let calls = Arc::new(AtomicUsize::new(0));
        let listener_calls = Arc::clone(&calls);
        (calls, move || {
            listener_calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_store_creation_uses_reducer_initial_state() {
        let store = Store::new(TestReducer);
        assert_eq!(store.state(|s| s.value), 10);
    }

    #[test]
    fn test_store_with_preloaded_state() {
        let store = Store::with_state(TestReducer, TestState { value: 3 });
        assert_eq!(store.get_state().value, 3);
    }

    #[test]
    fn test_dispatch_action() {
        let store = Store::new(TestReducer);

        let outcome = store.dispatch(TestAction::Decrement).unwrap();

        assert!(outcome.is_reduced());
        assert_eq!(store.state(|s| s.value), 9);
    }

    #[test]
    fn test_multiple_actions() {
        let store = Store::new(TestReducer);

        store.dispatch(TestAction::Decrement).unwrap();
        store.dispatch(TestAction::Decrement).unwrap();
        store.dispatch(TestAction::Decrement).unwrap();

        assert_eq!(store.state(|s| s.value), 7);
    }

    #[test]
    fn test_unrecognized_action_keeps_state_identity() {
        let store = Store::new(TestReducer);
        let before = store.get_state();

        store.dispatch(TestAction::NoOp).unwrap();

        assert!(Arc::ptr_eq(&before, &store.get_state()));
    }

    #[test]
    fn test_previous_state_is_not_mutated() {
        let store = Store::new(TestReducer);
        let before = store.get_state();

        store.dispatch(TestAction::Increment).unwrap();

        assert_eq!(before.value, 10);
        assert_eq!(store.get_state().value, 11);
    }

    #[test]
    fn test_clones_share_state() {
        let store = Store::new(TestReducer);
        let other = store.clone();

        other.dispatch(TestAction::Increment).unwrap();

        assert_eq!(store.state(|s| s.value), 11);
    }

    #[test]
    fn test_subscriber_called_once_per_dispatch() {
        let store = Store::new(TestReducer);
        let (calls, listener) = counter();

        let subscription = store.subscribe(listener);
        store.dispatch(TestAction::Increment).unwrap();
        store.dispatch(TestAction::NoOp).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let store = Store::new(TestReducer);
        let (_calls, listener) = counter();
        let (other_calls, other) = counter();

        let subscription = store.subscribe(listener);
        let _other = store.subscribe(other);

        subscription.unsubscribe();
        subscription.unsubscribe();

        assert!(!subscription.is_active());
        assert_eq!(store.subscriber_count(), 1);

        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(other_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_after_store_dropped() {
        let store = Store::new(TestReducer);
        let (_calls, listener) = counter();
        let subscription = store.subscribe(listener);

        drop(store);
        subscription.unsubscribe();

        assert!(!subscription.is_active());
    }

    #[test]
    fn test_subscribers_see_committed_state_in_registration_order() {
        let store = Store::new(TestReducer);
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            let reader = store.clone();
            let _ = store.subscribe(move || {
                lock(&seen).push((tag, reader.state(|s| s.value)));
            });
        }

        store.dispatch(TestAction::Increment).unwrap();

        assert_eq!(*lock(&seen), vec![("first", 11), ("second", 11)]);
    }

    #[test]
    fn test_unsubscribe_during_notification_uses_snapshot() {
        let store = Store::new(TestReducer);
        let (second_calls, second) = counter();

        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&victim);
        let _first = store.subscribe(move || {
            if let Some(subscription) = lock(&slot).as_ref() {
                subscription.unsubscribe();
            }
        });
        *lock(&victim) = Some(store.subscribe(second));

        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);

        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_during_notification_waits_for_next_pass() {
        let store = Store::new(TestReducer);
        let (late_calls, late) = counter();
        let late = Arc::new(late);

        let registrar = store.clone();
        let added = Arc::new(AtomicBool::new(false));
        let _first = store.subscribe(move || {
            if !added.swap(true, Ordering::SeqCst) {
                let late = Arc::clone(&late);
                let _ = registrar.subscribe(move || (*late)());
            }
        });

        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_can_dispatch() {
        let store = Store::new(TestReducer);
        let inner = store.clone();

        let _ = store.subscribe(move || {
            if inner.state(|s| s.value) == 11 {
                inner.dispatch(TestAction::Increment).unwrap();
            }
        });

        store.dispatch(TestAction::Increment).unwrap();

        assert_eq!(store.state(|s| s.value), 12);
    }

    #[test]
    fn test_concurrent_dispatches_commit_every_action() {
        let store = Store::new(TestReducer);
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let _subscription = store.subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        store.dispatch(TestAction::Increment).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(store.state(|s| s.value), 10 + 1000);
        assert_eq!(notified.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn test_notify_unchanged_disabled() {
        let config = StoreConfig::default().with_notify_unchanged(false);
        let store = Store::with_config(TestReducer, config);
        let (calls, listener) = counter();
        let _subscription = store.subscribe(listener);

        store.dispatch(TestAction::NoOp).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reducer_panic_leaves_state_unchanged() {
        let store = Store::new(TestReducer);
        let (calls, listener) = counter();
        let _subscription = store.subscribe(listener);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = store.dispatch(TestAction::Explode);
        }));

        assert!(result.is_err());
        assert_eq!(store.state(|s| s.value), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // The store stays usable
        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(store.state(|s| s.value), 11);
    }

    struct FailingMiddleware;

    impl Middleware<TestState, TestAction> for FailingMiddleware {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn handle(
            &self,
            _api: &TestApi,
            next: TestNext<'_>,
            input: TestInput,
        ) -> Result<DispatchOutcome, StoreError> {
            match input {
                Dispatch::Action(TestAction::Decrement) => Err(StoreError::middleware(
                    "failing",
                    anyhow::anyhow!("decrement refused"),
                )),
                other => next.run(other),
            }
        }
    }

    #[test]
    fn test_middleware_error_propagates() {
        let store = Store::builder(TestReducer)
            .middleware(FailingMiddleware)
            .build();

        let error = store.dispatch(TestAction::Decrement).unwrap_err();

        assert!(matches!(error, StoreError::Middleware { stage: "failing", .. }));
        assert_eq!(error.to_string(), "Middleware `failing` failed: decrement refused");
        assert_eq!(store.state(|s| s.value), 10);

        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(store.state(|s| s.value), 11);
    }

    struct SwallowNoOps;

    impl Middleware<TestState, TestAction> for SwallowNoOps {
        fn handle(
            &self,
            _api: &TestApi,
            next: TestNext<'_>,
            input: TestInput,
        ) -> Result<DispatchOutcome, StoreError> {
            match input {
                Dispatch::Action(TestAction::NoOp) => Ok(DispatchOutcome::Intercepted),
                other => next.run(other),
            }
        }
    }

    #[test]
    fn test_middleware_short_circuit_skips_reducer_and_listeners() {
        let store = Store::builder(TestReducer).middleware(SwallowNoOps).build();
        let (calls, listener) = counter();
        let _subscription = store.subscribe(listener);

        let outcome = store.dispatch(TestAction::NoOp).unwrap();

        assert!(matches!(outcome, DispatchOutcome::Intercepted));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    struct Invert;

    impl Middleware<TestState, TestAction> for Invert {
        fn handle(
            &self,
            _api: &TestApi,
            next: TestNext<'_>,
            input: TestInput,
        ) -> Result<DispatchOutcome, StoreError> {
            match input {
                Dispatch::Action(TestAction::Increment) => next.run(TestAction::Decrement.into()),
                other => next.run(other),
            }
        }
    }

    #[test]
    fn test_middleware_can_transform() {
        let store = Store::builder(TestReducer).middleware(Invert).build();

        store.dispatch(TestAction::Increment).unwrap();

        assert_eq!(store.state(|s| s.value), 9);
    }

    struct DoubleDispatch;

    impl Middleware<TestState, TestAction> for DoubleDispatch {
        fn handle(
            &self,
            api: &TestApi,
            next: TestNext<'_>,
            input: TestInput,
        ) -> Result<DispatchOutcome, StoreError> {
            if let Dispatch::Action(TestAction::Decrement) = &input {
                // Re-enters the pipeline from the top with a different action
                api.dispatch(TestAction::Increment)?;
            }
            next.run(input)
        }
    }

    #[test]
    fn test_middleware_can_dispatch_through_api() {
        let store = Store::builder(TestReducer).middleware(DoubleDispatch).build();
        let (calls, listener) = counter();
        let _subscription = store.subscribe(listener);

        store.dispatch(TestAction::Decrement).unwrap();

        assert_eq!(store.state(|s| s.value), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn bump_twice() -> Operation<TestState, TestAction> {
        Operation::new("bump_twice", |api| async move {
            let _ = api.dispatch(TestAction::Increment);
            tokio::task::yield_now().await;
            let _ = api.dispatch(TestAction::Increment);
        })
    }

    #[test]
    fn test_operation_without_middleware_is_rejected() {
        let store = Store::new(TestReducer);

        let error = store.dispatch(bump_twice()).unwrap_err();

        assert!(matches!(error, StoreError::UnhandledOperation("bump_twice")));
        assert_eq!(store.state(|s| s.value), 10);
    }

    #[test]
    fn test_operation_outside_runtime_fails() {
        let store = Store::builder(TestReducer)
            .middleware(OperationMiddleware::new())
            .build();

        let error = store.dispatch(bump_twice()).unwrap_err();

        assert!(matches!(error, StoreError::NoRuntime));
        assert_eq!(store.pending_operations(), 0);
    }

    #[tokio::test]
    async fn test_operation_dispatches_through_store() {
        let store = Store::builder(TestReducer)
            .middleware(OperationMiddleware::new())
            .build();
        let (calls, listener) = counter();
        let _subscription = store.subscribe(listener);

        let mut handle = store.dispatch(bump_twice()).unwrap().into_handle().unwrap();
        handle
            .wait_with_timeout(Duration::from_secs(1))
            .await
            .unwrap();

        assert!(handle.is_finished());
        assert_eq!(store.state(|s| s.value), 12);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.pending_operations(), 0);
    }

    #[tokio::test]
    async fn test_operation_reads_state() {
        let store = Store::builder(TestReducer)
            .middleware(OperationMiddleware::new())
            .build();

        let op = Operation::new("conditional", |api: TestApi| async move {
            if api.state(|s| s.value) == 10 {
                let _ = api.dispatch(TestAction::Decrement);
            }
        });
        let mut handle = store.dispatch(op).unwrap().into_handle().unwrap();
        handle.wait().await;

        assert_eq!(store.state(|s| s.value), 9);
    }

    #[tokio::test]
    async fn test_operation_timeout_stops_work() {
        let config = StoreConfig::default().with_operation_timeout(Duration::from_millis(20));
        let store = Store::builder(TestReducer)
            .middleware(OperationMiddleware::new())
            .config(config)
            .build();

        let op = Operation::new("slow", |api: TestApi| async move {
            let _ = api.dispatch(TestAction::Increment);
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = api.dispatch(TestAction::Increment);
        });
        let mut handle = store.dispatch(op).unwrap().into_handle().unwrap();
        handle
            .wait_with_timeout(Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(store.state(|s| s.value), 11);
    }

    #[tokio::test]
    async fn test_operation_abort() {
        let store = Store::builder(TestReducer)
            .middleware(OperationMiddleware::new())
            .build();

        let op = Operation::new("forever", |api: TestApi| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let _ = api.dispatch(TestAction::Increment);
        });
        let mut handle = store.dispatch(op).unwrap().into_handle().unwrap();
        handle.abort();
        handle
            .wait_with_timeout(Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(store.state(|s| s.value), 10);
        assert_eq!(store.pending_operations(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_operations() {
        let store = Store::builder(TestReducer)
            .middleware(OperationMiddleware::new())
            .build();

        let op = Operation::new("late_increment", |api: TestApi| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let _ = api.dispatch(TestAction::Increment);
        });
        store.dispatch(op).unwrap();

        store.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|s| s.value), 11);
        assert!(matches!(
            store.dispatch(bump_twice()),
            Err(StoreError::ShutdownInProgress)
        ));

        // Plain actions are still reduced
        store.dispatch(TestAction::Increment).unwrap();
        assert_eq!(store.state(|s| s.value), 12);
    }

    #[tokio::test]
    async fn test_shutdown_timeout() {
        let store = Store::builder(TestReducer)
            .middleware(OperationMiddleware::new())
            .build();

        let op = Operation::new("stuck", |_api: TestApi| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let handle = store.dispatch(op).unwrap().into_handle().unwrap();

        let result = store.shutdown(Duration::from_millis(30)).await;

        assert!(matches!(result, Err(StoreError::ShutdownTimeout(1))));
        handle.abort();
    }
}
