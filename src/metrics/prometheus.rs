//! Prometheus HTTP API client (instant queries).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{MetricsBackend, MetricsError, MetricsResult, QueryValue, Sample};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

const QUERY_PATH: &str = "/api/v1/query";

#[derive(Clone, Debug)]
pub struct PrometheusConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl PrometheusConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ResponseData>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum ResponseData {
    Scalar((f64, String)),
    Vector(Vec<VectorSample>),
    Matrix(serde_json::Value),
    String(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    value: (f64, String),
}

fn parse_value(raw: &str) -> MetricsResult<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| MetricsError::Parse(format!("invalid sample value '{}'", raw)))
}

impl ApiResponse {
    fn into_value(self) -> MetricsResult<QueryValue> {
        if !self.warnings.is_empty() {
            tracing::warn!(warnings = ?self.warnings, "Prometheus returned warnings");
        }

        if self.status != "success" {
            return Err(MetricsError::Api {
                error_type: self.error_type.unwrap_or_else(|| "unknown".into()),
                message: self.error.unwrap_or_default(),
            });
        }

        match self.data {
            Some(ResponseData::Scalar((_, value))) => Ok(QueryValue::Scalar(parse_value(&value)?)),
            Some(ResponseData::Vector(samples)) => {
                let samples = samples
                    .into_iter()
                    .map(|s| {
                        Ok(Sample {
                            labels: s.metric,
                            value: parse_value(&s.value.1)?,
                        })
                    })
                    .collect::<MetricsResult<Vec<_>>>()?;
                Ok(QueryValue::Vector(samples))
            }
            Some(ResponseData::Matrix(_)) => Ok(QueryValue::Other("matrix".into())),
            Some(ResponseData::String(_)) => Ok(QueryValue::Other("string".into())),
            None => Err(MetricsError::Parse("missing data".into())),
        }
    }
}

#[derive(Clone)]
pub struct PrometheusClient {
    http: reqwest::Client,
    config: PrometheusConfig,
}

impl PrometheusClient {
    pub fn new(config: PrometheusConfig) -> MetricsResult<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn with_http(config: PrometheusConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    fn url(&self) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), QUERY_PATH)
    }
}

#[async_trait::async_trait]
impl MetricsBackend for PrometheusClient {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn query(&self, query: &str, at: DateTime<Utc>) -> MetricsResult<QueryValue> {
        tracing::debug!(query, at = %at, "Prometheus instant query");

        let response = self
            .http
            .get(self.url())
            .query(&[("query", query.to_string()), ("time", at.timestamp().to_string())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<ApiResponse>(&body) {
            Ok(parsed) => parsed.into_value(),
            Err(_) if !status.is_success() => Err(MetricsError::Status {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(MetricsError::Parse(e.to_string())),
        }
    }
}
