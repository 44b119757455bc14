//! # Reflux Testing
//!
//! Testing utilities and helpers for the Reflux state container.
//!
//! This crate provides:
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//! - [`StateRecorder`]: a subscriber that keeps every state it was notified about
//! - [`RecordingMiddleware`]: a pipeline stage that logs when it is entered and left
//! - [`init_test_tracing`]: tracing output routed through the test harness
//!
//! ## Example
//!
//! ```ignore
//! use reflux_testing::StateRecorder;
//! use reflux_runtime::Store;
//!
//! #[test]
//! fn test_cake_flow() {
//!     let store = Store::new(CakeReducer);
//!     let recorder = StateRecorder::attach(&store);
//!
//!     store.dispatch(CakeAction::BuyCake).unwrap();
//!
//!     assert_eq!(recorder.states()[0].num_of_cakes, 9);
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};


fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Subscribers that capture state for later assertions
pub mod recorder {
    use super::{Arc, Mutex, lock};
    use reflux_core::reducer::Reducer;
    use reflux_runtime::{Store, Subscription};

    /// Records the store's state every time its listener is called
    ///
    /// The recorder unsubscribes itself when dropped.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let recorder = StateRecorder::attach(&store);
    /// store.dispatch(UsersAction::FetchUsersRequest)?;
    /// assert!(recorder.last().unwrap().loading);
    /// ```
    pub struct StateRecorder<S> {
        states: Arc<Mutex<Vec<Arc<S>>>>,
        subscription: Subscription,
    }

    impl<S: Send + Sync + 'static> StateRecorder<S> {
        /// Subscribe a new recorder to `store`
        #[must_use]
        pub fn attach<R>(store: &Store<R>) -> Self
        where
            R: Reducer<State = S>,
        {
            let states = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&states);
            let api = store.api();

            let subscription = store.subscribe(move || {
                lock(&sink).push(api.get_state());
            });

            Self {
                states,
                subscription,
            }
        }

        /// Every recorded state, oldest first
        #[must_use]
        pub fn states(&self) -> Vec<Arc<S>> {
            lock(&self.states).clone()
        }

        /// The most recent recorded state
        #[must_use]
        pub fn last(&self) -> Option<Arc<S>> {
            lock(&self.states).last().cloned()
        }

        /// Number of notifications received
        #[must_use]
        pub fn len(&self) -> usize {
            lock(&self.states).len()
        }

        /// Whether no notification has been received yet
        #[must_use]
        pub fn is_empty(&self) -> bool {
            lock(&self.states).is_empty()
        }

        /// Stop recording; already recorded states are kept
        pub fn detach(&self) {
            self.subscription.unsubscribe();
        }
    }

    impl<S> Drop for StateRecorder<S> {
        fn drop(&mut self) {
            self.subscription.unsubscribe();
        }
    }
}

/// Pipeline stages that record how they were traversed
pub mod middleware {
    use super::{Arc, Mutex, lock};
    use reflux_runtime::{Dispatch, DispatchOutcome, Middleware, Next, StoreApi, StoreError};

    /// Shared, ordered log of pipeline events
    #[derive(Debug, Clone, Default)]
    pub struct EventLog(Arc<Mutex<Vec<String>>>);

    impl EventLog {
        /// Create an empty log
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Append an entry
        pub fn push(&self, entry: impl Into<String>) {
            lock(&self.0).push(entry.into());
        }

        /// Snapshot of all entries, oldest first
        #[must_use]
        pub fn entries(&self) -> Vec<String> {
            lock(&self.0).clone()
        }

        /// Remove all entries
        pub fn clear(&self) {
            lock(&self.0).clear();
        }
    }

    /// A pass-through stage that logs `"<label>:before"` and `"<label>:after"`
    /// around the rest of the pipeline
    ///
    /// # Example
    ///
    /// ```ignore
    /// let log = EventLog::new();
    /// let store = Store::builder(reducer)
    ///     .middleware(RecordingMiddleware::new("A", &log))
    ///     .middleware(RecordingMiddleware::new("B", &log))
    ///     .build();
    /// ```
    #[derive(Debug, Clone)]
    pub struct RecordingMiddleware {
        label: &'static str,
        log: EventLog,
    }

    impl RecordingMiddleware {
        /// Create a stage writing to `log`
        #[must_use]
        pub fn new(label: &'static str, log: &EventLog) -> Self {
            Self {
                label,
                log: log.clone(),
            }
        }
    }

    impl<S, A> Middleware<S, A> for RecordingMiddleware
    where
        S: Send + Sync + 'static,
        A: Send + Sync + 'static,
    {
        fn name(&self) -> &'static str {
            self.label
        }

        fn handle(
            &self,
            _api: &StoreApi<S, A>,
            next: Next<'_, S, A>,
            input: Dispatch<S, A>,
        ) -> Result<DispatchOutcome, StoreError> {
            self.log.push(format!("{}:before", self.label));
            let outcome = next.run(input);
            self.log.push(format!("{}:after", self.label));
            outcome
        }
    }
}

/// Route `tracing` output through the test harness
///
/// Safe to call from every test; only the first call installs a subscriber.
/// The filter comes from `RUST_LOG`, defaulting to `debug`.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use middleware::{EventLog, RecordingMiddleware};
pub use recorder::StateRecorder;
pub use reducer_test::{ReducerTest, assertions};

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use reflux_core::action::Action;
    use reflux_core::reducer::{Reducer, next_state};
    use reflux_runtime::Store;

    #[derive(Clone, Debug, PartialEq)]
    struct Counter {
        count: u32,
    }

    #[derive(Clone, Debug)]
    enum CounterAction {
        Add(u32),
    }

    impl Action for CounterAction {
        fn action_type(&self) -> &'static str {
            "ADD"
        }
    }

    struct CounterReducer;

    impl Reducer for CounterReducer {
        type State = Counter;
        type Action = CounterAction;

        fn initial_state(&self) -> Counter {
            Counter { count: 0 }
        }

        fn reduce(&self, state: &Arc<Counter>, action: &CounterAction) -> Arc<Counter> {
            match action {
                CounterAction::Add(n) => next_state(state, |s| s.count += n),
            }
        }
    }

    #[test]
    fn test_recorder_captures_each_commit() {
        let store = Store::new(CounterReducer);
        let recorder = StateRecorder::attach(&store);

        store.dispatch(CounterAction::Add(1)).unwrap();
        store.dispatch(CounterAction::Add(2)).unwrap();

        let counts: Vec<u32> = recorder.states().iter().map(|s| s.count).collect();
        assert_eq!(counts, vec![1, 3]);
        assert_eq!(recorder.last().unwrap().count, 3);
    }

    #[test]
    fn test_recorder_detach_and_drop_unsubscribe() {
        let store = Store::new(CounterReducer);
        let recorder = StateRecorder::attach(&store);
        let other = StateRecorder::attach(&store);
        assert_eq!(store.subscriber_count(), 2);

        recorder.detach();
        store.dispatch(CounterAction::Add(1)).unwrap();
        assert!(recorder.is_empty());
        assert_eq!(other.len(), 1);

        drop(other);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_recording_middleware_logs_around_next() {
        let log = EventLog::new();
        let store = Store::builder(CounterReducer)
            .middleware(RecordingMiddleware::new("outer", &log))
            .build();

        store.dispatch(CounterAction::Add(1)).unwrap();

        assert_eq!(log.entries(), vec!["outer:before", "outer:after"]);
        log.clear();
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_init_test_tracing_is_idempotent() {
        init_test_tracing();
        init_test_tracing();
    }
}
