//! Cost-allocation data sources.
//!
//! An [`AllocationSource`] returns one keyed set of allocation entries per
//! window and [`Granularity`]. Keys are composite (`user/namespace[/controller[/container]]`);
//! validating their shape is left to the caller.

mod cache;
mod memory;
mod opencost;

pub use cache::CachedAllocationSource;
pub use memory::StaticAllocationSource;
pub use opencost::{DEFAULT_ALLOCATION_TIMEOUT, OpencostClient, OpencostConfig};

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::model::{Granularity, Window, finite_or_zero};

/// Allocation entries of one query, keyed by composite key.
pub type AllocationSet = HashMap<String, AllocationEntry>;

/// Cost observation for one composite key over one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default, deserialize_with = "lenient_cost")]
    pub cpu_cost: f64,
    #[serde(default, deserialize_with = "lenient_cost")]
    pub ram_cost: f64,
    #[serde(default, deserialize_with = "lenient_cost")]
    pub pv_cost: f64,
    #[serde(default, deserialize_with = "lenient_cost")]
    pub total_cost: f64,
}

impl AllocationEntry {
    pub fn new(cpu_cost: f64, ram_cost: f64, pv_cost: f64) -> Self {
        Self {
            cpu_cost,
            ram_cost,
            pv_cost,
            total_cost: cpu_cost + ram_cost + pv_cost,
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Accepts numbers, numeric strings, `"NaN"` and `null`; non-finite values become `0`.
fn lenient_cost<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
        Null,
    }

    let value = match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(n)) => n,
        Some(Raw::Text(s)) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        Some(Raw::Null) | None => 0.0,
    };
    Ok(finite_or_zero(value))
}

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("allocation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("allocation source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("allocation source error (code {code}): {message}")]
    Api { code: u16, message: String },

    #[error("unexpected allocation response: {0}")]
    Shape(String),

    #[error("allocation source unavailable: {0}")]
    Unavailable(String),
}

pub type AllocationResult<T> = std::result::Result<T, AllocationError>;

/// Source of raw cost-allocation data. Implementations must be safe for concurrent callers.
#[async_trait::async_trait]
pub trait AllocationSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        window: &Window,
        granularity: Granularity,
    ) -> AllocationResult<AllocationSet>;
}

#[async_trait::async_trait]
impl<S: AllocationSource + ?Sized> AllocationSource for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch(
        &self,
        window: &Window,
        granularity: Granularity,
    ) -> AllocationResult<AllocationSet> {
        (**self).fetch(window, granularity).await
    }
}
