//! # User Fetch
//!
//! Loads a list of users over HTTP through an async operation.
//!
//! The fetch moves the state through `Idle → Loading → Success | Error`:
//!
//! 1. [`UsersAction::FetchUsersRequest`] sets `loading`
//! 2. The [`UserSource`] is awaited once
//! 3. [`UsersAction::FetchUsersSuccess`] stores the users, or
//!    [`UsersAction::FetchUsersError`] stores the failure message
//!
//! The source is injected, so tests can replace the network with a canned
//! answer.
//!
//! ## Example
//!
//! ```no_run
//! use reflux_runtime::{OperationMiddleware, Store};
//! use std::sync::Arc;
//! use user_fetch::{HttpUserSource, UsersReducer, fetch_users};
//!
//! # async fn example() -> Result<(), reflux_runtime::StoreError> {
//! let store = Store::builder(UsersReducer)
//!     .middleware(OperationMiddleware::new())
//!     .build();
//!
//! let source = Arc::new(HttpUserSource::default());
//! if let Some(mut handle) = store.dispatch(fetch_users(source))?.into_handle() {
//!     handle.wait().await;
//! }
//! println!("{} users", store.state(|s| s.users.len()));
//! # Ok(())
//! # }
//! ```

use reflux_core::{
    action::Action,
    reducer::{Reducer, next_state},
};
use reflux_runtime::{Operation, StoreApi};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Where users are fetched from by default
pub const DEFAULT_USERS_ENDPOINT: &str = "https://jsonplaceholder.typicode.com/users";

/// State of the users list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsersState {
    /// A fetch is in flight
    pub loading: bool,
    /// Users from the last successful fetch
    pub users: Vec<Value>,
    /// Message of the last failed fetch, empty otherwise
    pub error: String,
}

/// Actions for the users list
///
/// Serialized with a `type` discriminator, e.g.
/// `{"type":"FETCH_USERS_ERROR","payload":"network down"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsersAction {
    /// A fetch started
    FetchUsersRequest,
    /// A fetch returned users
    FetchUsersSuccess {
        /// The fetched records
        payload: Vec<Value>,
    },
    /// A fetch failed
    FetchUsersError {
        /// Human-readable failure message
        payload: String,
    },
}

impl Action for UsersAction {
    fn action_type(&self) -> &'static str {
        match self {
            Self::FetchUsersRequest => "FETCH_USERS_REQUEST",
            Self::FetchUsersSuccess { .. } => "FETCH_USERS_SUCCESS",
            Self::FetchUsersError { .. } => "FETCH_USERS_ERROR",
        }
    }
}

/// Reducer for [`UsersState`]
#[derive(Debug, Clone, Copy, Default)]
pub struct UsersReducer;

impl Reducer for UsersReducer {
    type State = UsersState;
    type Action = UsersAction;

    fn initial_state(&self) -> UsersState {
        UsersState::default()
    }

    fn reduce(&self, state: &Arc<UsersState>, action: &UsersAction) -> Arc<UsersState> {
        match action {
            UsersAction::FetchUsersRequest => next_state(state, |s| s.loading = true),
            UsersAction::FetchUsersSuccess { payload } => next_state(state, |s| {
                s.loading = false;
                s.users.clone_from(payload);
                s.error.clear();
            }),
            UsersAction::FetchUsersError { payload } => next_state(state, |s| {
                s.loading = false;
                s.users.clear();
                s.error.clone_from(payload);
            }),
        }
    }
}

/// Errors a [`UserSource`] can fail with
#[derive(Error, Debug)]
pub enum FetchError {
    /// The request could not be sent or the body could not be decoded
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status
    #[error("Request failed with status code {0}")]
    Status(u16),

    /// Any other failure, described by its message
    #[error("{0}")]
    Message(String),
}

/// Future returned by [`UserSource::fetch_users`]
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<Value>, FetchError>> + Send + 'a>>;

/// Something that can produce the list of users
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of
/// `async fn` so it stays usable as `Arc<dyn UserSource>`.
pub trait UserSource: Send + Sync {
    /// Fetch all users once
    fn fetch_users(&self) -> FetchFuture<'_>;
}

/// [`UserSource`] backed by an HTTP GET returning a JSON array
#[derive(Debug, Clone)]
pub struct HttpUserSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUserSource {
    /// Fetch from `endpoint` with a default client
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    /// Fetch from `endpoint` using a preconfigured client
    #[must_use]
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// The endpoint requests go to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Default for HttpUserSource {
    fn default() -> Self {
        Self::new(DEFAULT_USERS_ENDPOINT)
    }
}

impl UserSource for HttpUserSource {
    fn fetch_users(&self) -> FetchFuture<'_> {
        Box::pin(async move {
            tracing::debug!(endpoint = %self.endpoint, "Fetching users");

            let response = self.client.get(&self.endpoint).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status.as_u16()));
            }

            let users: Vec<Value> = response.json().await?;
            tracing::debug!(count = users.len(), "Fetched users");
            Ok(users)
        })
    }
}

/// The async fetch, ready to be dispatched
///
/// Requires an `OperationMiddleware` in the store. Failures from `source`
/// end up in the state as an error message; they are never returned from
/// `dispatch`.
#[must_use]
pub fn fetch_users(source: Arc<dyn UserSource>) -> Operation<UsersState, UsersAction> {
    Operation::new("fetch_users", move |api| async move {
        report(&api, UsersAction::FetchUsersRequest);

        let outcome = match source.fetch_users().await {
            Ok(users) => UsersAction::FetchUsersSuccess { payload: users },
            Err(error) => {
                tracing::warn!(%error, "User fetch failed");
                UsersAction::FetchUsersError {
                    payload: error.to_string(),
                }
            },
        };

        report(&api, outcome);
    })
}

/// Dispatch from inside the operation, which has nobody to return errors to
fn report(api: &StoreApi<UsersState, UsersAction>, action: UsersAction) {
    let action_type = action.action_type();
    if let Err(error) = api.dispatch(action) {
        tracing::error!(action_type, %error, "Dispatch from fetch_users failed");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use reflux_testing::ReducerTest;
    use serde_json::json;

    #[test]
    fn test_request_sets_loading() {
        ReducerTest::new(UsersReducer)
            .when_action(UsersAction::FetchUsersRequest)
            .then_state(|state| {
                assert!(state.loading);
                assert!(state.users.is_empty());
                assert_eq!(state.error, "");
            })
            .run();
    }

    #[test]
    fn test_success_stores_users_and_clears_error() {
        ReducerTest::new(UsersReducer)
            .given_state(UsersState {
                loading: true,
                users: vec![],
                error: "stale".to_string(),
            })
            .when_action(UsersAction::FetchUsersSuccess {
                payload: vec![json!({"id": 1})],
            })
            .then_state(|state| {
                assert!(!state.loading);
                assert_eq!(state.users, vec![json!({"id": 1})]);
                assert_eq!(state.error, "");
            })
            .run();
    }

    #[test]
    fn test_error_clears_users() {
        ReducerTest::new(UsersReducer)
            .given_state(UsersState {
                loading: true,
                users: vec![json!({"id": 1})],
                error: String::new(),
            })
            .when_action(UsersAction::FetchUsersError {
                payload: "network down".to_string(),
            })
            .then_state(|state| {
                assert!(!state.loading);
                assert!(state.users.is_empty());
                assert_eq!(state.error, "network down");
            })
            .run();
    }

    #[test]
    fn test_actions_carry_type_tag() {
        let json = serde_json::to_value(UsersAction::FetchUsersError {
            payload: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json, json!({"type": "FETCH_USERS_ERROR", "payload": "boom"}));

        let parsed: UsersAction =
            serde_json::from_value(json!({"type": "FETCH_USERS_REQUEST"})).unwrap();
        assert_eq!(parsed, UsersAction::FetchUsersRequest);
        assert_eq!(parsed.action_type(), "FETCH_USERS_REQUEST");
    }

    #[test]
    fn test_fetch_error_messages() {
        assert_eq!(
            FetchError::Status(503).to_string(),
            "Request failed with status code 503"
        );
        assert_eq!(
            FetchError::Message("network down".to_string()).to_string(),
            "network down"
        );
    }

    #[test]
    fn test_default_endpoint() {
        assert_eq!(HttpUserSource::default().endpoint(), DEFAULT_USERS_ENDPOINT);
    }
}
