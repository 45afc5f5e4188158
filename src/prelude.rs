//! Commonly used types and traits.
//!
//! ```rust
//! use cluster_billing::prelude::*;
//! ```

pub use crate::Error;
pub use crate::Result;

// Data model
pub use crate::model::{
    BillingSnapshot, CostEntry, CostNode, CostTree, Granularity, UserCostTree, Window,
};

// Sources
pub use crate::allocation::{AllocationSource, OpencostClient, OpencostConfig};
pub use crate::metrics::{FactorResolver, MetricsBackend, PrometheusClient, PrometheusConfig};

// Aggregation and persistence
pub use crate::aggregation::{CostTreeBuilder, ProcessCostDecomposer};
pub use crate::job::{BillingJob, JobReport};
pub use crate::store::{MemorySnapshotStore, SnapshotStore};

// Configuration
pub use crate::config::{BillingConfig, ConfigBuilder, ProcessCostConfig};
