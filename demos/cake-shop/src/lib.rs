//! # Cake Shop
//!
//! A shop selling cakes and ice cream, demonstrating the Reflux store.
//!
//! This example showcases:
//! - A single reducer driving a store (the cake counter)
//! - Reducer composition: two counters under one keyed state
//! - Subscribing to and unsubscribing from state changes
//!
//! ## Example
//!
//! ```no_run
//! use cake_shop::{CakeReducer, buy_cake};
//! use reflux_runtime::Store;
//!
//! # fn example() -> Result<(), reflux_runtime::StoreError> {
//! let store = Store::new(CakeReducer);
//!
//! store.dispatch(buy_cake())?;
//! assert_eq!(store.state(|s| s.num_of_cakes), 9);
//! # Ok(())
//! # }
//! ```

use reflux_core::{
    action::Action,
    composition::{CombinedReducer, combine_reducers},
    reducer::{Reducer, next_state},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key of the cake slice in the shop state
pub const CAKE: &str = "cake";

/// Key of the ice-cream slice in the shop state
pub const ICE_CREAM: &str = "ice_cream";

/// Cake inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CakeState {
    /// Cakes left on the shelf
    pub num_of_cakes: u32,
}

impl Default for CakeState {
    fn default() -> Self {
        Self { num_of_cakes: 10 }
    }
}

/// Ice-cream inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCreamState {
    /// Ice creams left in the freezer
    pub num_of_ice_creams: u32,
}

impl Default for IceCreamState {
    fn default() -> Self {
        Self {
            num_of_ice_creams: 20,
        }
    }
}

/// Shop actions
///
/// Serialized with a `type` discriminator, e.g. `{"type":"BUY_ICE_CREAM"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShopAction {
    /// A customer buys one cake
    BuyCake {
        /// Free-form note carried along with the purchase
        #[serde(default, skip_serializing_if = "Option::is_none")]
        info: Option<String>,
    },
    /// A customer buys one ice cream
    BuyIceCream,
}

impl Action for ShopAction {
    fn action_type(&self) -> &'static str {
        match self {
            Self::BuyCake { .. } => "BUY_CAKE",
            Self::BuyIceCream => "BUY_ICE_CREAM",
        }
    }
}

/// Action creator for a cake purchase
#[must_use]
pub fn buy_cake() -> ShopAction {
    ShopAction::BuyCake {
        info: Some("first redux action".to_string()),
    }
}

/// Action creator for an ice-cream purchase
#[must_use]
pub const fn buy_ice_cream() -> ShopAction {
    ShopAction::BuyIceCream
}

/// Reducer for the cake slice
///
/// An empty shelf ignores further purchases.
#[derive(Debug, Clone, Copy, Default)]
pub struct CakeReducer;

impl Reducer for CakeReducer {
    type State = CakeState;
    type Action = ShopAction;

    fn initial_state(&self) -> CakeState {
        CakeState::default()
    }

    fn reduce(&self, state: &Arc<CakeState>, action: &ShopAction) -> Arc<CakeState> {
        match action {
            ShopAction::BuyCake { .. } if state.num_of_cakes > 0 => {
                next_state(state, |s| s.num_of_cakes -= 1)
            },
            ShopAction::BuyCake { .. } | ShopAction::BuyIceCream => Arc::clone(state),
        }
    }
}

/// Reducer for the ice-cream slice
#[derive(Debug, Clone, Copy, Default)]
pub struct IceCreamReducer;

impl Reducer for IceCreamReducer {
    type State = IceCreamState;
    type Action = ShopAction;

    fn initial_state(&self) -> IceCreamState {
        IceCreamState::default()
    }

    fn reduce(&self, state: &Arc<IceCreamState>, action: &ShopAction) -> Arc<IceCreamState> {
        match action {
            ShopAction::BuyIceCream if state.num_of_ice_creams > 0 => {
                next_state(state, |s| s.num_of_ice_creams -= 1)
            },
            ShopAction::BuyIceCream | ShopAction::BuyCake { .. } => Arc::clone(state),
        }
    }
}

/// The whole shop: cakes under [`CAKE`], ice creams under [`ICE_CREAM`]
#[must_use]
pub fn shop_reducer() -> CombinedReducer<ShopAction> {
    combine_reducers()
        .slice(CAKE, CakeReducer)
        .slice(ICE_CREAM, IceCreamReducer)
        .build()
}
