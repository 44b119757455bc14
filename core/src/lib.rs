//! # Reflux Core
//!
//! Core traits and types for the Reflux state container.
//!
//! This crate provides the pure half of the architecture: the values that
//! describe intent (actions) and the functions that fold them into state
//! (reducers). Nothing in here performs I/O or holds shared mutable state;
//! the `reflux-runtime` crate owns the Store that drives these pieces.
//!
//! ## Core Concepts
//!
//! - **State**: An immutable value, held behind an [`Arc`](std::sync::Arc)
//! - **Action**: A tagged description of an intended change
//! - **Reducer**: Pure function `(State, Action) → State`
//! - **Composition**: Keyed composite state built from child reducers
//!
//! ## Architecture Principles
//!
//! - Unidirectional Data Flow
//! - State is replaced, never mutated in place
//! - Unchanged state keeps its identity (`Arc::ptr_eq`)
//!
//! ## Example
//!
//! ```
//! use reflux_core::{action::Action, reducer::{Reducer, next_state}};
//! use std::sync::Arc;
//!
//! #[derive(Clone, Debug)]
//! struct CakeState {
//!     num_of_cakes: u32,
//! }
//!
//! #[derive(Clone, Debug)]
//! enum CakeAction {
//!     BuyCake,
//! }
//!
//! impl Action for CakeAction {
//!     fn action_type(&self) -> &'static str {
//!         "BUY_CAKE"
//!     }
//! }
//!
//! struct CakeReducer;
//!
//! impl Reducer for CakeReducer {
//!     type State = CakeState;
//!     type Action = CakeAction;
//!
//!     fn initial_state(&self) -> CakeState {
//!         CakeState { num_of_cakes: 10 }
//!     }
//!
//!     fn reduce(&self, state: &Arc<CakeState>, action: &CakeAction) -> Arc<CakeState> {
//!         match action {
//!             CakeAction::BuyCake => next_state(state, |s| s.num_of_cakes -= 1),
//!         }
//!     }
//! }
//!
//! let state = CakeReducer.init();
//! let state = CakeReducer.reduce(&state, &CakeAction::BuyCake);
//! assert_eq!(state.num_of_cakes, 9);
//! ```

// Re-export commonly used types
pub use serde::{Deserialize, Serialize};

/// Reducer composition (keyed composite state)
pub mod composition;

/// Action module - Descriptions of intended state changes
///
/// Actions are plain values: cloneable, printable, free of closures and cheap
/// to construct. Each action family is an enum, and the reducer matches on it
/// exhaustively.
pub mod action {
    use std::fmt::Debug;

    /// Marker trait for values that can be dispatched to a store
    ///
    /// The `action_type` discriminator is what logs and test assertions key
    /// on. Derive `serde::Serialize` with `#[serde(tag = "type")]` on the enum
    /// when a serialized form with a `type` field is wanted.
    ///
    /// # Example
    ///
    /// ```
    /// use reflux_core::action::Action;
    ///
    /// #[derive(Clone, Debug)]
    /// enum IceCreamAction {
    ///     BuyIceCream,
    /// }
    ///
    /// impl Action for IceCreamAction {
    ///     fn action_type(&self) -> &'static str {
    ///         match self {
    ///             Self::BuyIceCream => "BUY_ICECREAM",
    ///         }
    ///     }
    /// }
    ///
    /// assert_eq!(IceCreamAction::BuyIceCream.action_type(), "BUY_ICECREAM");
    /// ```
    pub trait Action: Clone + Debug + Send + Sync + 'static {
        /// The action's type tag, used for logging and filtering
        fn action_type(&self) -> &'static str;
    }
}

/// Reducer module - The core trait for state transitions
///
/// Reducers are pure functions: `(State, Action) → State`.
///
/// They receive the current state behind an `Arc` and return the next one.
/// Returning `Arc::clone(state)` means "nothing changed", which downstream
/// code can detect cheaply with `Arc::ptr_eq`.
pub mod reducer {
    use super::action::Action;
    use std::sync::Arc;

    /// The Reducer trait - core abstraction for state transitions
    ///
    /// # Contract
    ///
    /// - **Pure**: no I/O, no interior mutability, same inputs give equal outputs
    /// - **Total**: every action yields a state; actions the reducer does not
    ///   care about return the input `Arc` unchanged
    /// - **Immutable**: the input state is never modified; a change produces a
    ///   fresh value (see [`next_state`])
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for UsersReducer {
    ///     type State = UsersState;
    ///     type Action = UsersAction;
    ///
    ///     fn initial_state(&self) -> UsersState {
    ///         UsersState::default()
    ///     }
    ///
    ///     fn reduce(&self, state: &Arc<UsersState>, action: &UsersAction) -> Arc<UsersState> {
    ///         match action {
    ///             UsersAction::FetchUsersRequest => next_state(state, |s| s.loading = true),
    ///             _ => Arc::clone(state),
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer: Send + Sync + 'static {
        /// The state type this reducer operates on
        type State: Send + Sync + 'static;

        /// The action type this reducer processes
        type Action: Action;

        /// The reducer's answer to an absent action
        ///
        /// Stores call this exactly once when no preloaded state is supplied,
        /// establishing the baseline value.
        fn initial_state(&self) -> Self::State;

        /// Compute the next state for `action`
        ///
        /// # Arguments
        ///
        /// - `state`: The current state (shared, never mutated)
        /// - `action`: The action to apply
        ///
        /// # Returns
        ///
        /// The next state. Return `Arc::clone(state)` for unrecognized actions.
        fn reduce(&self, state: &Arc<Self::State>, action: &Self::Action) -> Arc<Self::State>;

        /// Initial state wrapped for use as the first committed value
        fn init(&self) -> Arc<Self::State> {
            Arc::new(self.initial_state())
        }

        /// Accept a caller-supplied starting state
        ///
        /// Stores call this once, at creation, instead of [`Reducer::init`]
        /// when a preloaded state is given. Reducers whose state can be
        /// partially supplied complete it here; the default takes it as is.
        fn preload(&self, state: Self::State) -> Arc<Self::State> {
            Arc::new(state)
        }
    }

    /// Build a new state from a copy of `state` with `change` applied
    ///
    /// The copy is structurally independent of the original; the original
    /// `Arc` keeps pointing at the old value.
    ///
    /// ```
    /// use reflux_core::reducer::next_state;
    /// use std::sync::Arc;
    ///
    /// let before = Arc::new(vec![1, 2]);
    /// let after = next_state(&before, |v| v.push(3));
    /// assert_eq!(*before, vec![1, 2]);
    /// assert_eq!(*after, vec![1, 2, 3]);
    /// ```
    pub fn next_state<S, F>(state: &Arc<S>, change: F) -> Arc<S>
    where
        S: Clone,
        F: FnOnce(&mut S),
    {
        let mut next = S::clone(state);
        change(&mut next);
        Arc::new(next)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Test code can use unwrap

    use super::action::Action;
    use super::reducer::{Reducer, next_state};
    use proptest::prelude::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TallyState {
        total: i64,
    }

    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    #[serde(tag = "type")]
    enum TallyAction {
        #[serde(rename = "ADD")]
        Add { amount: i64 },
        #[serde(rename = "NOTE")]
        Note { info: String },
    }

    impl Action for TallyAction {
        fn action_type(&self) -> &'static str {
            match self {
                Self::Add { .. } => "ADD",
                Self::Note { .. } => "NOTE",
            }
        }
    }

    struct TallyReducer;

    impl Reducer for TallyReducer {
        type State = TallyState;
        type Action = TallyAction;

        fn initial_state(&self) -> TallyState {
            TallyState { total: 0 }
        }

        fn reduce(&self, state: &Arc<TallyState>, action: &TallyAction) -> Arc<TallyState> {
            match action {
                TallyAction::Add { amount } => {
                    next_state(state, |s| s.total = s.total.saturating_add(*amount))
                },
                TallyAction::Note { .. } => Arc::clone(state),
            }
        }
    }

    #[test]
    fn test_init_uses_initial_state() {
        assert_eq!(*TallyReducer.init(), TallyState { total: 0 });
    }

    #[test]
    fn test_preload_keeps_supplied_state() {
        let state = TallyReducer.preload(TallyState { total: 7 });
        assert_eq!(*state, TallyState { total: 7 });
    }

    #[test]
    fn test_reduce_produces_new_value() {
        let before = TallyReducer.init();
        let after = TallyReducer.reduce(&before, &TallyAction::Add { amount: 2 });

        assert_eq!(before.total, 0);
        assert_eq!(after.total, 2);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_unrecognized_action_preserves_identity() {
        let before = TallyReducer.init();
        let after = TallyReducer.reduce(
            &before,
            &TallyAction::Note {
                info: "first action".to_string(),
            },
        );

        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_action_serializes_with_type_tag() {
        let json = serde_json::to_value(TallyAction::Add { amount: 1 }).unwrap();
        assert_eq!(json["type"], "ADD");
        assert_eq!(json["amount"], 1);
    }

    proptest! {
        #[test]
        fn prop_reduce_is_deterministic(start in -1000i64..1000, amount in -1000i64..1000) {
            let state = Arc::new(TallyState { total: start });
            let action = TallyAction::Add { amount };

            let first = TallyReducer.reduce(&state, &action);
            let second = TallyReducer.reduce(&state, &action);

            prop_assert_eq!(&*first, &*second);
            prop_assert_eq!(state.total, start);
        }
    }
}
