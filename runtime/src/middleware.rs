//! The middleware pipeline.
//!
//! Every dispatched input walks an ordered list of [`Middleware`] stages that
//! is fixed when the store is built. Each stage sees the input together with
//! a [`StoreApi`] and a [`Next`] continuation, and decides whether to forward
//! it, transform it, swallow it, or do something around it. After the last
//! stage comes the terminal stage, which runs the reducer and notifies
//! subscribers.
//!
//! Two stages ship with the runtime:
//!
//! - [`LoggerMiddleware`]: logs each action with the state before and after
//! - [`OperationMiddleware`]: runs [`Operation`]s on the tokio runtime
//!
//! # Example
//!
//! ```ignore
//! let store = Store::builder(root_reducer)
//!     .middleware(LoggerMiddleware::new())
//!     .middleware(OperationMiddleware::new())
//!     .build();
//! ```

use crate::error::StoreError;
use crate::operation::{Dispatch, DispatchOutcome, Operation, OperationHandle};
use reflux_core::action::Action;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::Level;

/// Internal: the store capabilities handed out through [`StoreApi`]
pub(crate) trait StoreCore<S, A>: Send + Sync {
    fn current_state(&self) -> Arc<S>;

    fn dispatch_input(
        self: Arc<Self>,
        input: Dispatch<S, A>,
    ) -> Result<DispatchOutcome, StoreError>;

    fn spawn_operation(
        self: Arc<Self>,
        operation: Operation<S, A>,
    ) -> Result<OperationHandle, StoreError>;
}

/// Read and dispatch access to the owning store
///
/// Given to middleware on every call and to operations when they start.
/// Dispatching through it re-enters the pipeline from the first stage.
pub struct StoreApi<S, A> {
    core: Arc<dyn StoreCore<S, A>>,
}

impl<S, A> StoreApi<S, A> {
    pub(crate) fn new(core: Arc<dyn StoreCore<S, A>>) -> Self {
        Self { core }
    }

    /// The current state
    #[must_use]
    pub fn get_state(&self) -> Arc<S> {
        self.core.current_state()
    }

    /// Read the current state through a closure
    pub fn state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&S) -> T,
    {
        f(&self.core.current_state())
    }

    /// Dispatch an action or operation through the full pipeline
    ///
    /// # Errors
    ///
    /// Propagates any [`StoreError`] raised by a middleware stage or by the
    /// terminal stage.
    pub fn dispatch(&self, input: impl Into<Dispatch<S, A>>) -> Result<DispatchOutcome, StoreError> {
        Arc::clone(&self.core).dispatch_input(input.into())
    }

    /// Spawn `operation` on the tokio runtime, bypassing the pipeline
    ///
    /// This is what [`OperationMiddleware`] does with the operations it
    /// recognizes; custom async stages can use it the same way.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NoRuntime`]: called outside a tokio runtime
    /// - [`StoreError::ShutdownInProgress`]: the store is shutting down
    pub fn spawn(&self, operation: Operation<S, A>) -> Result<OperationHandle, StoreError> {
        Arc::clone(&self.core).spawn_operation(operation)
    }
}

impl<S, A> Clone for StoreApi<S, A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S, A> std::fmt::Debug for StoreApi<S, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreApi").finish_non_exhaustive()
    }
}

/// A pipeline stage
///
/// # Contract
///
/// - Call `next.run(input)` at most once to forward (the continuation is
///   consumed by value)
/// - Return [`DispatchOutcome::Intercepted`] to stop the input
/// - Return `Err` to abort the dispatch; the error reaches the caller of
///   `dispatch` unchanged
///
/// # Example
///
/// ```ignore
/// struct DropNoops;
///
/// impl Middleware<AppState, AppAction> for DropNoops {
///     fn handle(
///         &self,
///         _api: &StoreApi<AppState, AppAction>,
///         next: Next<'_, AppState, AppAction>,
///         input: Dispatch<AppState, AppAction>,
///     ) -> Result<DispatchOutcome, StoreError> {
///         match input {
///             Dispatch::Action(AppAction::Noop) => Ok(DispatchOutcome::Intercepted),
///             other => next.run(other),
///         }
///     }
/// }
/// ```
pub trait Middleware<S, A>: Send + Sync + 'static {
    /// Stage name for logs and errors
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Process one dispatched input
    ///
    /// # Errors
    ///
    /// Implementations return [`StoreError::Middleware`] for their own
    /// failures and propagate errors from `next` unchanged.
    fn handle(
        &self,
        api: &StoreApi<S, A>,
        next: Next<'_, S, A>,
        input: Dispatch<S, A>,
    ) -> Result<DispatchOutcome, StoreError>;
}

type Terminal<'a, S, A> = dyn Fn(Dispatch<S, A>) -> Result<DispatchOutcome, StoreError> + 'a;

/// Continuation to the rest of the pipeline
pub struct Next<'a, S, A> {
    stages: &'a [Arc<dyn Middleware<S, A>>],
    api: &'a StoreApi<S, A>,
    terminal: &'a Terminal<'a, S, A>,
}

impl<'a, S: 'static, A: 'static> Next<'a, S, A> {
    pub(crate) fn new(
        stages: &'a [Arc<dyn Middleware<S, A>>],
        api: &'a StoreApi<S, A>,
        terminal: &'a Terminal<'a, S, A>,
    ) -> Self {
        Self {
            stages,
            api,
            terminal,
        }
    }

    /// Forward `input` to the following stage, or to the reducer after the last one
    ///
    /// # Errors
    ///
    /// Returns whatever error a later stage or the terminal stage produces.
    pub fn run(self, input: Dispatch<S, A>) -> Result<DispatchOutcome, StoreError> {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                tracing::trace!(stage = stage.name(), "Entering middleware stage");
                let next = Next::new(rest, self.api, self.terminal);
                stage.handle(self.api, next, input)
            },
            None => (self.terminal)(input),
        }
    }

    /// Number of stages still ahead of the reducer
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.stages.len()
    }
}

/// Emits a `tracing` event at a level chosen at runtime
macro_rules! event_at {
    ($level:expr, $($arg:tt)+) => {{
        let level = $level;
        if level == Level::ERROR {
            tracing::error!($($arg)+);
        } else if level == Level::WARN {
            tracing::warn!($($arg)+);
        } else if level == Level::INFO {
            tracing::info!($($arg)+);
        } else if level == Level::DEBUG {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    }};
}

/// Logs every action with the state before and after it is reduced
///
/// A pure observer: the input is always forwarded unchanged, and errors from
/// later stages pass through untouched.
///
/// # Example
///
/// ```ignore
/// let logger = LoggerMiddleware::new().with_level(Level::INFO).with_state(false);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LoggerMiddleware {
    level: Level,
    with_state: bool,
}

impl LoggerMiddleware {
    /// Create a logger at `DEBUG` level that includes state snapshots
    #[must_use]
    pub const fn new() -> Self {
        Self {
            level: Level::DEBUG,
            with_state: true,
        }
    }

    /// Set the level of emitted events
    #[must_use]
    pub const fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Include (or omit) the previous and next state in the events
    #[must_use]
    pub const fn with_state(mut self, with_state: bool) -> Self {
        self.with_state = with_state;
        self
    }
}

impl Default for LoggerMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> Middleware<S, A> for LoggerMiddleware
where
    S: Debug + Send + Sync + 'static,
    A: Action,
{
    fn name(&self) -> &'static str {
        "logger"
    }

    fn handle(
        &self,
        api: &StoreApi<S, A>,
        next: Next<'_, S, A>,
        input: Dispatch<S, A>,
    ) -> Result<DispatchOutcome, StoreError> {
        let Dispatch::Action(action) = &input else {
            if let Dispatch::Operation(operation) = &input {
                event_at!(self.level, operation = operation.name(), "dispatching operation");
            }
            return next.run(input);
        };

        let action_type = action.action_type();
        if self.with_state {
            let prev_state = api.get_state();
            event_at!(self.level, action_type, ?action, ?prev_state, "action");
        } else {
            event_at!(self.level, action_type, ?action, "action");
        }

        let outcome = next.run(input)?;

        if self.with_state {
            let next_state = api.get_state();
            event_at!(self.level, action_type, ?outcome, ?next_state, "action done");
        } else {
            event_at!(self.level, action_type, ?outcome, "action done");
        }

        Ok(outcome)
    }
}

/// Runs dispatched [`Operation`]s instead of forwarding them
///
/// Plain actions pass straight through. Register it before any stage that
/// should only ever see plain actions.
///
/// Operations are spawned on the tokio runtime, not polled in place. When
/// `dispatch` returns [`DispatchOutcome::Spawned`], none of the operation's
/// body has run yet, so actions it dispatches before its first `.await` are
/// committed only once the task is first polled. Await the returned
/// [`OperationHandle`] (or yield to the runtime) before reading state that
/// the operation sets up.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationMiddleware;

impl OperationMiddleware {
    /// Create the operation stage
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<S, A> Middleware<S, A> for OperationMiddleware
where
    S: Send + Sync + 'static,
    A: Action,
{
    fn name(&self) -> &'static str {
        "operation"
    }

    fn handle(
        &self,
        api: &StoreApi<S, A>,
        next: Next<'_, S, A>,
        input: Dispatch<S, A>,
    ) -> Result<DispatchOutcome, StoreError> {
        match input {
            Dispatch::Operation(operation) => {
                tracing::debug!(operation = operation.name(), "Spawning operation");
                api.spawn(operation).map(DispatchOutcome::Spawned)
            },
            action @ Dispatch::Action(_) => next.run(action),
        }
    }
}
