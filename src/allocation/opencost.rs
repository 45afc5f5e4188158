//! OpenCost allocation API client.

use std::time::Duration;

use serde::Deserialize;

use super::{AllocationError, AllocationResult, AllocationSet, AllocationSource};
use crate::model::{Granularity, Window};

pub const DEFAULT_ALLOCATION_TIMEOUT: Duration = Duration::from_secs(300);

const ALLOCATION_PATH: &str = "/allocation/compute";

#[derive(Clone, Debug)]
pub struct OpencostConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl OpencostConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_ALLOCATION_TIMEOUT,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct AllocationResponse {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Vec<AllocationSet>>,
}

#[derive(Clone)]
pub struct OpencostClient {
    http: reqwest::Client,
    config: OpencostConfig,
}

impl OpencostClient {
    pub fn new(config: OpencostConfig) -> AllocationResult<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn with_http(config: OpencostConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    fn url(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            ALLOCATION_PATH
        )
    }

    fn into_set(response: AllocationResponse) -> AllocationResult<AllocationSet> {
        if let Some(code) = response.code
            && code != 200
        {
            return Err(AllocationError::Api {
                code,
                message: response.message.unwrap_or_default(),
            });
        }

        let mut data = response
            .data
            .ok_or_else(|| AllocationError::Shape("missing data".into()))?;
        if data.len() != 1 {
            return Err(AllocationError::Shape(format!(
                "expected exactly one allocation set, got {}",
                data.len()
            )));
        }
        Ok(data.remove(0))
    }
}

#[async_trait::async_trait]
impl AllocationSource for OpencostClient {
    fn name(&self) -> &str {
        "opencost"
    }

    async fn fetch(
        &self,
        window: &Window,
        granularity: Granularity,
    ) -> AllocationResult<AllocationSet> {
        tracing::debug!(%window, %granularity, "Fetching allocation");

        let response = self
            .http
            .get(self.url())
            .query(&[
                ("window", window.to_query_param()),
                ("aggregate", granularity.aggregate().to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AllocationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AllocationResponse = response.json().await?;
        let set = Self::into_set(parsed)?;
        tracing::debug!(%granularity, entries = set.len(), "Allocation fetched");
        Ok(set)
    }
}
