//! Canned metrics backend for tests and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{MetricsBackend, MetricsError, MetricsResult, QueryValue};

/// Answers rendered queries from a fixed table; unknown queries yield `default`.
#[derive(Debug)]
pub struct StaticMetricsBackend {
    responses: HashMap<String, QueryValue>,
    failures: HashMap<String, String>,
    default: QueryValue,
    seen: Mutex<Vec<String>>,
}

impl Default for StaticMetricsBackend {
    fn default() -> Self {
        Self {
            responses: HashMap::new(),
            failures: HashMap::new(),
            default: QueryValue::Scalar(f64::NAN),
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl StaticMetricsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, query: impl Into<String>, value: QueryValue) -> Self {
        self.responses.insert(query.into(), value);
        self
    }

    pub fn scalar(self, query: impl Into<String>, value: f64) -> Self {
        self.respond(query, QueryValue::Scalar(value))
    }

    pub fn fail(mut self, query: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(query.into(), message.into());
        self
    }

    pub fn default_value(mut self, value: QueryValue) -> Self {
        self.default = value;
        self
    }

    /// Rendered queries received so far, in order.
    pub fn queries(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl MetricsBackend for StaticMetricsBackend {
    fn name(&self) -> &str {
        "static"
    }

    async fn query(&self, query: &str, _at: DateTime<Utc>) -> MetricsResult<QueryValue> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(query.to_string());
        }
        if let Some(message) = self.failures.get(query) {
            return Err(MetricsError::Api {
                error_type: "static".into(),
                message: message.clone(),
            });
        }
        Ok(self
            .responses
            .get(query)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}
