//! Attribution factors from a metrics backend.
//!
//! Factor queries are templates rendered per user and window
//! ([`QueryTemplate`]), executed against a [`MetricsBackend`] and resolved to
//! either a single ratio or a labelled set of ratios by [`FactorResolver`].
//! Undefined values (NaN or infinite) always resolve to `0`.

mod memory;
mod prometheus;
mod resolver;
mod template;

pub use memory::StaticMetricsBackend;
pub use prometheus::{DEFAULT_QUERY_TIMEOUT, PrometheusClient, PrometheusConfig};
pub use resolver::{FactorResolver, normalize};
pub use template::{INSTANCE_ID, QueryParams, QueryTemplate, RANGE, USER_ID};

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// One element of an instant vector.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn new(value: f64) -> Self {
        Self {
            labels: BTreeMap::new(),
            value,
        }
    }

    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    /// Value of the last label in name order, empty when unlabelled.
    pub fn name(&self) -> &str {
        self.labels
            .iter()
            .next_back()
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }
}

/// Result of an instant query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Scalar(f64),
    Vector(Vec<Sample>),
    /// Any other result type (`matrix`, `string`).
    Other(String),
}

impl QueryValue {
    pub fn kind(&self) -> &str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Vector(_) => "vector",
            Self::Other(kind) => kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metrics backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("metrics query failed ({error_type}): {message}")]
    Api { error_type: String, message: String },

    #[error("unexpected metrics response: expected {expected}, got {actual}")]
    UnexpectedKind {
        expected: &'static str,
        actual: String,
    },

    #[error("invalid metrics response: {0}")]
    Parse(String),

    #[error("metrics query timed out after {:.1}s", .0.as_secs_f64())]
    Timeout(Duration),
}

pub type MetricsResult<T> = std::result::Result<T, MetricsError>;

/// Executes instant queries.
#[async_trait::async_trait]
pub trait MetricsBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn query(&self, query: &str, at: DateTime<Utc>) -> MetricsResult<QueryValue>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_name_uses_last_label() {
        let sample = Sample::new(1.0)
            .label("a_label", "first")
            .label("process_definition", "pd-1");
        assert_eq!(sample.name(), "pd-1");
        assert_eq!(Sample::new(1.0).name(), "");
    }

    #[test]
    fn test_query_value_kind() {
        assert_eq!(QueryValue::Scalar(1.0).kind(), "scalar");
        assert_eq!(QueryValue::Vector(vec![]).kind(), "vector");
        assert_eq!(QueryValue::Other("matrix".into()).kind(), "matrix");
    }
}
