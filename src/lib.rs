//! # cluster-billing
//!
//! Per-user cost attribution for a shared cluster.
//!
//! Cost allocations are fetched at three granularities (namespace,
//! controller, container), joined into one cost tree per user, extended
//! with an account-wide `process` branch whose shares come from
//! metrics-derived attribution factors, and stored as immutable monthly
//! snapshots.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cluster_billing::aggregation::{CostTreeBuilder, ProcessCostDecomposer};
//! use cluster_billing::allocation::{OpencostClient, OpencostConfig};
//! use cluster_billing::config::ProcessCostConfig;
//! use cluster_billing::job::BillingJob;
//! use cluster_billing::metrics::{FactorResolver, PrometheusClient, PrometheusConfig};
//! use cluster_billing::store::MemorySnapshotStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let opencost = OpencostClient::new(OpencostConfig::new("http://opencost:9003"))?;
//!     let prometheus = PrometheusClient::new(PrometheusConfig::new("http://prometheus:9090"))?;
//!
//!     let decomposer = ProcessCostDecomposer::new(
//!         ProcessCostConfig::default(),
//!         FactorResolver::new(Arc::new(prometheus)),
//!     );
//!     let builder = CostTreeBuilder::new(Arc::new(opencost), decomposer);
//!     let job = BillingJob::new(builder, Arc::new(MemorySnapshotStore::new()));
//!
//!     let report = job.run(1).await?;
//!     println!("{} snapshots written", report.snapshots_written);
//!     Ok(())
//! }
//! ```

pub mod aggregation;
pub mod allocation;
pub mod api;
pub mod config;
pub mod job;
pub mod metrics;
pub mod model;
pub mod observability;
pub mod prelude;
pub mod store;

pub use aggregation::{CostTreeBuilder, ProcessCostDecomposer};
pub use allocation::{
    AllocationEntry, AllocationError, AllocationSet, AllocationSource, CachedAllocationSource,
    OpencostClient, OpencostConfig, StaticAllocationSource,
};
pub use api::{ApiError, BillingComponents, Caller};
pub use config::{BillingConfig, ConfigBuilder, ConfigError, ProcessCostConfig};
pub use job::{BillingJob, JobReport, trailing_month_windows};
pub use metrics::{
    FactorResolver, MetricsBackend, MetricsError, PrometheusClient, PrometheusConfig,
    QueryTemplate, StaticMetricsBackend,
};
pub use model::{
    BillingSnapshot, CompositeKey, CostEntry, CostNode, CostTree, Granularity, KeyError,
    SyntheticBranch, TreeKey, UserCostTree, Window,
};
pub use observability::{BillingMetrics, MetricsSummary};
pub use store::{MemorySnapshotStore, SnapshotStore, StoreError};

use chrono::{DateTime, Utc};

/// Error type for cluster-billing operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A composite key with the wrong number of segments.
    #[error("Malformed allocation key: {0}")]
    Structural(#[from] KeyError),

    /// Window end not after its start.
    #[error("Invalid window: {from} is not before {to}")]
    InvalidWindow {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },

    /// Year and month that name no calendar month.
    #[error("Invalid period: {year}-{month}")]
    InvalidPeriod { year: i32, month: u32 },

    /// Trailing month count out of range.
    #[error("Cannot look back {months} months (at most {max})")]
    MonthCount { months: u32, max: u32 },

    /// Allocation source request failed.
    #[error("Allocation fetch ({granularity}) failed: {source}")]
    Allocation {
        granularity: Granularity,
        source: AllocationError,
    },

    /// Metrics backend request failed or returned the wrong result kind.
    #[error("Metrics query failed: {0}")]
    Metrics(#[from] MetricsError),

    /// Snapshot persistence failed.
    #[error("Snapshot store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {:.1}s", after.as_secs_f64())]
    Timeout {
        operation: &'static str,
        after: std::time::Duration,
    },

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed allocation data; fatal to the window, never retried
    Structural,
    /// Allocation source or metrics backend failures; the window can be rerun
    UpstreamUnavailable,
    /// Snapshot write or read failures
    Persistence,
    /// Configuration or invalid input
    Configuration,
    /// Internal errors (serialization, unexpected states)
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Structural(_) => ErrorCategory::Structural,

            Error::Allocation { .. } | Error::Metrics(_) | Error::Timeout { .. } => {
                ErrorCategory::UpstreamUnavailable
            }

            Error::Store(_) => ErrorCategory::Persistence,

            Error::Config(_)
            | Error::InvalidWindow { .. }
            | Error::InvalidPeriod { .. }
            | Error::MonthCount { .. } => ErrorCategory::Configuration,

            Error::Json(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_structural(&self) -> bool {
        self.category() == ErrorCategory::Structural
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Whether rerunning the same window later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(e) => store::is_transient(e),
            _ => self.category() == ErrorCategory::UpstreamUnavailable,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
