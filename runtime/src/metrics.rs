//! Metric names and descriptions for the store runtime.
//!
//! The runtime records through the [`metrics`] facade only. Nothing is
//! exported unless the application installs a recorder; call
//! [`describe_metrics`] once after installing one to attach help text.
//!
//! # Example
//!
//! ```rust,no_run
//! // After installing a recorder of your choice:
//! reflux_runtime::metrics::describe_metrics();
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Inputs accepted by `dispatch`
pub const DISPATCH_TOTAL: &str = "store_dispatch_total";

/// Dispatches refused because the store is shutting down
pub const DISPATCH_REJECTED_TOTAL: &str = "store_dispatch_rejected_total";

/// Reducer wall time per committed action
pub const REDUCER_DURATION_SECONDS: &str = "store_reducer_duration_seconds";

/// Listener invocations across all notification passes
pub const SUBSCRIBERS_NOTIFIED_TOTAL: &str = "store_subscribers_notified_total";

/// Currently registered listeners
pub const SUBSCRIBERS_ACTIVE: &str = "store_subscribers_active";

/// Operations handed to the async runtime
pub const OPERATIONS_SPAWNED_TOTAL: &str = "store_operations_spawned_total";

/// Operations stopped by the configured timeout
pub const OPERATIONS_TIMED_OUT_TOTAL: &str = "store_operations_timed_out_total";

/// Operations still running
pub const OPERATIONS_PENDING: &str = "store_operations_pending";

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(DISPATCH_TOTAL, "Total number of inputs dispatched to the store");
    describe_counter!(
        DISPATCH_REJECTED_TOTAL,
        "Total number of dispatches rejected during shutdown"
    );
    describe_histogram!(
        REDUCER_DURATION_SECONDS,
        "Time taken by the reducer to compute the next state"
    );
    describe_counter!(
        SUBSCRIBERS_NOTIFIED_TOTAL,
        "Total number of listener invocations"
    );
    describe_gauge!(SUBSCRIBERS_ACTIVE, "Number of registered listeners");
    describe_counter!(
        OPERATIONS_SPAWNED_TOTAL,
        "Total number of async operations spawned"
    );
    describe_counter!(
        OPERATIONS_TIMED_OUT_TOTAL,
        "Total number of async operations stopped by timeout"
    );
    describe_gauge!(OPERATIONS_PENDING, "Number of async operations in flight");
}
