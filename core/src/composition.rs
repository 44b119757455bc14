//! Reducer composition utilities
//!
//! [`combine_reducers`] builds one reducer out of several named child
//! reducers. The resulting state is a [`CombinedState`]: a keyed collection of
//! slices, each owned by exactly one child.
//!
//! Every child sees every action. A child that ignores the action returns its
//! slice unchanged, so the slice keeps its identity; if no child changed, the
//! composite state itself keeps its identity.
//!
//! # Examples
//!
//! ```
//! use reflux_core::action::Action;
//! use reflux_core::composition::combine_reducers;
//! use reflux_core::reducer::{Reducer, next_state};
//! use std::sync::Arc;
//!
//! #[derive(Clone, Debug)]
//! enum ShopAction {
//!     BuyCake,
//!     BuyIceCream,
//! }
//!
//! impl Action for ShopAction {
//!     fn action_type(&self) -> &'static str {
//!         match self {
//!             Self::BuyCake => "BUY_CAKE",
//!             Self::BuyIceCream => "BUY_ICECREAM",
//!         }
//!     }
//! }
//!
//! #[derive(Clone, Debug)]
//! struct Stock {
//!     count: u32,
//! }
//!
//! struct CakeReducer;
//! struct IceCreamReducer;
//!
//! impl Reducer for CakeReducer {
//!     type State = Stock;
//!     type Action = ShopAction;
//!
//!     fn initial_state(&self) -> Stock {
//!         Stock { count: 10 }
//!     }
//!
//!     fn reduce(&self, state: &Arc<Stock>, action: &ShopAction) -> Arc<Stock> {
//!         match action {
//!             ShopAction::BuyCake => next_state(state, |s| s.count -= 1),
//!             ShopAction::BuyIceCream => Arc::clone(state),
//!         }
//!     }
//! }
//!
//! impl Reducer for IceCreamReducer {
//!     type State = Stock;
//!     type Action = ShopAction;
//!
//!     fn initial_state(&self) -> Stock {
//!         Stock { count: 20 }
//!     }
//!
//!     fn reduce(&self, state: &Arc<Stock>, action: &ShopAction) -> Arc<Stock> {
//!         match action {
//!             ShopAction::BuyIceCream => next_state(state, |s| s.count -= 1),
//!             ShopAction::BuyCake => Arc::clone(state),
//!         }
//!     }
//! }
//!
//! let root = combine_reducers()
//!     .slice("cake", CakeReducer)
//!     .slice("ice_cream", IceCreamReducer)
//!     .build();
//!
//! let state = root.init();
//! let next = root.reduce(&state, &ShopAction::BuyIceCream);
//!
//! let cake_before = state.slice::<Stock>("cake").unwrap();
//! let cake_after = next.slice::<Stock>("cake").unwrap();
//! assert!(Arc::ptr_eq(&cake_before, &cake_after));
//! assert_eq!(next.slice::<Stock>("ice_cream").unwrap().count, 19);
//! ```

use crate::action::Action;
use crate::reducer::Reducer;
use std::any::Any;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::sync::Arc;

/// A value that can live in a [`CombinedState`] slot
///
/// Implemented for every `Debug + Send + Sync + 'static` type.
pub trait SliceValue: Debug + Send + Sync + 'static {
    /// Convert into an `Any` handle for typed access
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T> SliceValue for T
where
    T: Debug + Send + Sync + 'static,
{
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

type SliceRef = Arc<dyn SliceValue>;

/// Composite state produced by a [`CombinedReducer`]
///
/// Maps each registration key to that child's own state slice, in
/// registration order.
#[derive(Clone)]
pub struct CombinedState {
    slices: Vec<(&'static str, SliceRef)>,
}

impl CombinedState {
    /// Typed access to the slice stored under `key`
    ///
    /// Returns `None` when the key is unknown or the slice has another type.
    #[must_use]
    pub fn slice<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.entry(key)
            .and_then(|slice| Arc::clone(slice).into_any().downcast::<T>().ok())
    }

    /// Keys in registration order
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slices.iter().map(|(key, _)| *key)
    }

    /// Number of slices
    #[must_use]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    /// Whether the composite has no slices at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    fn entry(&self, key: &str) -> Option<&SliceRef> {
        self.slices
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, slice)| slice)
    }
}

impl Debug for CombinedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.slices.iter().map(|(key, slice)| (key, slice)))
            .finish()
    }
}

/// Internal: a child reducer with its state type erased
trait SliceReducer<A>: Send + Sync {
    fn initial_slice(&self) -> SliceRef;

    /// Whether `slice` holds this child's state type
    fn owns(&self, slice: &SliceRef) -> bool;

    fn reduce_slice(&self, slice: &SliceRef, action: &A) -> SliceRef;
}

struct Child<R>(R);

impl<R> SliceReducer<R::Action> for Child<R>
where
    R: Reducer,
    R::State: Debug,
{
    fn initial_slice(&self) -> SliceRef {
        self.0.init()
    }

    fn owns(&self, slice: &SliceRef) -> bool {
        Arc::clone(slice).into_any().is::<R::State>()
    }

    fn reduce_slice(&self, slice: &SliceRef, action: &R::Action) -> SliceRef {
        // A slice of another type came from a different composite; the
        // action applies to this child's initial slice instead.
        match Arc::clone(slice).into_any().downcast::<R::State>() {
            Ok(current) => {
                let next = self.0.reduce(&current, action);
                if Arc::ptr_eq(&next, &current) {
                    Arc::clone(slice)
                } else {
                    next as SliceRef
                }
            },
            Err(_) => self.0.reduce(&self.0.init(), action) as SliceRef,
        }
    }
}

/// Start building a composite reducer
///
/// Register children with [`CombineReducers::slice`] and finish with
/// [`CombineReducers::build`]. The key set is fixed once `build` runs.
#[must_use]
pub fn combine_reducers<A>() -> CombineReducers<A>
where
    A: Action,
{
    CombineReducers {
        children: Vec::new(),
        _action: PhantomData,
    }
}

/// Builder returned by [`combine_reducers`]
pub struct CombineReducers<A> {
    children: Vec<(&'static str, Box<dyn SliceReducer<A>>)>,
    _action: PhantomData<fn(A)>,
}

impl<A> CombineReducers<A>
where
    A: Action,
{
    /// Register `reducer` as the owner of the slice named `key`
    ///
    /// Registering the same key twice keeps the position of the first
    /// registration and the reducer of the last.
    #[must_use]
    pub fn slice<R>(mut self, key: &'static str, reducer: R) -> Self
    where
        R: Reducer<Action = A>,
        R::State: Debug,
    {
        let child: Box<dyn SliceReducer<A>> = Box::new(Child(reducer));
        match self.children.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = child,
            None => self.children.push((key, child)),
        }
        self
    }

    /// Freeze the key set and produce the composite reducer
    #[must_use]
    pub fn build(self) -> CombinedReducer<A> {
        CombinedReducer {
            children: self.children,
            _action: PhantomData,
        }
    }
}

/// A reducer over a [`CombinedState`], created by [`combine_reducers`]
pub struct CombinedReducer<A> {
    children: Vec<(&'static str, Box<dyn SliceReducer<A>>)>,
    _action: PhantomData<fn(A)>,
}

impl<A> CombinedReducer<A> {
    /// Keys in registration order
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.children.iter().map(|(key, _)| *key)
    }
}

impl<A> Debug for CombinedReducer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CombinedReducer")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<A> Reducer for CombinedReducer<A>
where
    A: Action,
{
    type State = CombinedState;
    type Action = A;

    fn initial_state(&self) -> CombinedState {
        CombinedState {
            slices: self
                .children
                .iter()
                .map(|(key, child)| (*key, child.initial_slice()))
                .collect(),
        }
    }

    /// Complete a preloaded composite
    ///
    /// Registered keys that are missing, or that hold a slice of the wrong
    /// type, get the child's initial slice. Unregistered keys are dropped.
    fn preload(&self, state: CombinedState) -> Arc<CombinedState> {
        let slices = self
            .children
            .iter()
            .map(|(key, child)| {
                let slice = state
                    .entry(key)
                    .filter(|slice| child.owns(slice))
                    .map_or_else(|| child.initial_slice(), Arc::clone);
                (*key, slice)
            })
            .collect();

        Arc::new(CombinedState { slices })
    }

    fn reduce(&self, state: &Arc<CombinedState>, action: &A) -> Arc<CombinedState> {
        let mut changed = false;
        let mut slices = Vec::with_capacity(self.children.len());

        for (key, child) in &self.children {
            let next = match state.entry(key) {
                Some(current) => {
                    let next = child.reduce_slice(current, action);
                    changed |= !Arc::ptr_eq(&next, current);
                    next
                },
                // A slice missing from a preloaded state starts from its default
                None => {
                    changed = true;
                    child.initial_slice()
                },
            };
            slices.push((*key, next));
        }

        if changed || slices.len() != state.len() {
            Arc::new(CombinedState { slices })
        } else {
            Arc::clone(state)
        }
    }
}
