//! Cake shop example binary
//!
//! Runs the cake counter on its own, then the combined cake and ice-cream shop.

use cake_shop::{
    CAKE, CakeReducer, CakeState, ICE_CREAM, IceCreamState, buy_cake, buy_ice_cream, shop_reducer,
};
use reflux_runtime::{LoggerMiddleware, Store, StoreError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), StoreError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cake_shop=debug,reflux_runtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== Cake Counter ===\n");

    let store = Store::new(CakeReducer);
    println!("Initial state: {:?}", store.get_state());

    let reader = store.clone();
    let subscription = store.subscribe(move || {
        println!("Updated state: {:?}", reader.get_state());
    });

    store.dispatch(buy_cake())?;
    store.dispatch(buy_cake())?;
    store.dispatch(buy_cake())?;

    subscription.unsubscribe();

    // No longer printed
    store.dispatch(buy_cake())?;
    println!("After unsubscribing: {:?}", store.get_state());

    println!("\n=== Cake & Ice Cream Shop ===\n");

    let shop = Store::builder(shop_reducer())
        .middleware(LoggerMiddleware::new())
        .build();
    println!("Initial state: {:?}", shop.get_state());

    let reader = shop.clone();
    let subscription = shop.subscribe(move || {
        let state = reader.get_state();
        let cakes = state.slice::<CakeState>(CAKE).map_or(0, |s| s.num_of_cakes);
        let ice_creams = state
            .slice::<IceCreamState>(ICE_CREAM)
            .map_or(0, |s| s.num_of_ice_creams);
        println!("Updated state: cakes={cakes}, ice_creams={ice_creams}");
    });

    shop.dispatch(buy_cake())?;
    shop.dispatch(buy_cake())?;
    shop.dispatch(buy_cake())?;
    shop.dispatch(buy_ice_cream())?;
    shop.dispatch(buy_ice_cream())?;

    subscription.unsubscribe();

    tracing::info!(state = ?shop.get_state(), "Shop closed");
    Ok(())
}
