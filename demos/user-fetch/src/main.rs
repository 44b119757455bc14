//! User fetch example binary
//!
//! Fetches users from the public placeholder API and prints every state the
//! store goes through.

use reflux_runtime::{LoggerMiddleware, OperationMiddleware, Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use user_fetch::{HttpUserSource, UsersReducer, fetch_users};

#[tokio::main]
async fn main() -> Result<(), StoreError> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "user_fetch=debug,reflux_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = Store::builder(UsersReducer)
        .middleware(LoggerMiddleware::new().with_state(false))
        .middleware(OperationMiddleware::new())
        .build();

    let reader = store.clone();
    let subscription = store.subscribe(move || {
        let state = reader.get_state();
        println!(
            "loading={} users={} error={:?}",
            state.loading,
            state.users.len(),
            state.error
        );
    });

    let source = Arc::new(HttpUserSource::default());
    println!("Fetching users from {}", source.endpoint());

    if let Some(mut handle) = store.dispatch(fetch_users(source))?.into_handle() {
        handle.wait_with_timeout(Duration::from_secs(30)).await?;
    }

    subscription.unsubscribe();
    store.shutdown(Duration::from_secs(1)).await?;

    let state = store.get_state();
    for user in &state.users {
        println!("{}", user["name"].as_str().unwrap_or("<unnamed>"));
    }
    Ok(())
}
