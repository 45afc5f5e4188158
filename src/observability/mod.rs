//! Structured logging, spans and in-process metrics.

mod metrics;
mod spans;

pub use metrics::{
    BillingMetrics, Counter, Histogram, MetricsSummary, WINDOW_LATENCY_BOUNDS_MS,
};
pub use spans::{WindowSpan, persist_span, process_tree_span};

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,cluster_billing=info";

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(json: bool) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    if json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
