//! Resolution of attribution factors.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::{
    DEFAULT_QUERY_TIMEOUT, MetricsBackend, MetricsError, MetricsResult, QueryParams,
    QueryTemplate, QueryValue,
};
use crate::model::Window;
use crate::observability::BillingMetrics;

/// Divides each value by the sum of all values.
///
/// An empty map stays empty. When the sum is zero or not finite every factor
/// is `0`: no usable attribution data means no attributed cost.
pub fn normalize(raw: BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    if raw.is_empty() {
        return raw;
    }

    let sum: f64 = raw.values().sum();
    if sum == 0.0 || !sum.is_finite() {
        tracing::warn!(
            entries = raw.len(),
            sum,
            "Factor set has no usable total, attributing nothing"
        );
        return raw.into_keys().map(|k| (k, 0.0)).collect();
    }

    raw.into_iter().map(|(k, v)| (k, v / sum)).collect()
}

/// Renders factor queries and evaluates them at the end of a window.
#[derive(Clone)]
pub struct FactorResolver {
    backend: Arc<dyn MetricsBackend>,
    timeout: Duration,
    metrics: Option<Arc<BillingMetrics>>,
}

impl FactorResolver {
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_QUERY_TIMEOUT,
            metrics: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BillingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn sanitize(&self, value: f64) -> f64 {
        let undefined = !value.is_finite();
        if let Some(ref metrics) = self.metrics {
            metrics.record_factor(undefined);
        }
        if undefined { 0.0 } else { value }
    }

    async fn execute(&self, query: &str, window: &Window) -> MetricsResult<QueryValue> {
        tokio::time::timeout(self.timeout, self.backend.query(query, window.to))
            .await
            .map_err(|_| MetricsError::Timeout(self.timeout))?
    }

    /// Single ratio. `user_id` is `None` for account-wide factors.
    pub async fn scalar(
        &self,
        template: &QueryTemplate,
        user_id: Option<&str>,
        window: &Window,
    ) -> MetricsResult<f64> {
        let mut params = QueryParams::for_window(window);
        params.user_id = user_id;
        let query = template.render(&params);

        match self.execute(&query, window).await? {
            QueryValue::Scalar(value) => {
                let factor = self.sanitize(value);
                tracing::debug!(query = %query, factor, "Resolved scalar factor");
                Ok(factor)
            }
            other => Err(MetricsError::UnexpectedKind {
                expected: "scalar",
                actual: other.kind().to_string(),
            }),
        }
    }

    /// Raw per-label values of a vector query, non-finite values replaced by `0`.
    pub async fn vector(
        &self,
        template: &QueryTemplate,
        user_id: Option<&str>,
        instance_id: Option<&str>,
        window: &Window,
    ) -> MetricsResult<BTreeMap<String, f64>> {
        let mut params = QueryParams::for_window(window);
        params.user_id = user_id;
        params.instance_id = instance_id;
        let query = template.render(&params);

        match self.execute(&query, window).await? {
            QueryValue::Vector(samples) => Ok(samples
                .into_iter()
                .map(|s| (s.name().to_string(), self.sanitize(s.value)))
                .collect()),
            other => Err(MetricsError::UnexpectedKind {
                expected: "vector",
                actual: other.kind().to_string(),
            }),
        }
    }

    /// Normalized per-label factors of a vector query.
    pub async fn factor_map(
        &self,
        template: &QueryTemplate,
        user_id: Option<&str>,
        instance_id: Option<&str>,
        window: &Window,
    ) -> MetricsResult<BTreeMap<String, f64>> {
        let raw = self.vector(template, user_id, instance_id, window).await?;
        Ok(normalize(raw))
    }
}

impl std::fmt::Debug for FactorResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactorResolver")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
