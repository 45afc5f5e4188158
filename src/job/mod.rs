//! Scheduled entrypoint: computes and stores snapshots for trailing months.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::aggregation::{CostTreeBuilder, ProcessCostDecomposer};
use crate::allocation::{CachedAllocationSource, OpencostClient, OpencostConfig};
use crate::config::{BillingConfig, ConfigError};
use crate::metrics::{FactorResolver, PrometheusClient, PrometheusConfig};
use crate::model::{BillingSnapshot, Window};
use crate::observability::{BillingMetrics, WindowSpan, persist_span};
use crate::store::{SnapshotStore, StoreError};
use crate::{Error, Result};

/// Deadline of one snapshot write.
pub const DEFAULT_PERSIST_TIMEOUT: Duration = Duration::from_secs(30);

/// The `n` complete calendar months before `now`, most recent first.
pub fn trailing_month_windows(now: DateTime<Utc>, n: u32) -> Result<Vec<Window>> {
    Window::trailing_months(now, n)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobReport {
    pub windows: Vec<Window>,
    pub snapshots_written: usize,
}

pub struct BillingJob {
    builder: CostTreeBuilder,
    store: Arc<dyn SnapshotStore>,
    persist_timeout: Duration,
    metrics: Arc<BillingMetrics>,
}

impl BillingJob {
    pub fn new(builder: CostTreeBuilder, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            builder,
            store,
            persist_timeout: DEFAULT_PERSIST_TIMEOUT,
            metrics: Arc::new(BillingMetrics::new()),
        }
    }

    /// Wires cached OpenCost and Prometheus clients as described by `config`.
    pub fn from_config(config: &BillingConfig, store: Arc<dyn SnapshotStore>) -> Result<Self> {
        let metrics = Arc::new(BillingMetrics::new());

        let opencost = OpencostClient::new(
            OpencostConfig::new(&config.opencost_url).timeout(config.allocation_timeout()),
        )
        .map_err(|e| ConfigError::Client {
            component: "opencost",
            message: e.to_string(),
        })?;
        let source =
            CachedAllocationSource::new(opencost).with_ttl(config.allocation_cache_ttl());

        let prometheus = PrometheusClient::new(
            PrometheusConfig::new(&config.prometheus_url).timeout(config.query_timeout()),
        )?;
        let resolver = FactorResolver::new(Arc::new(prometheus))
            .with_timeout(config.query_timeout())
            .with_metrics(metrics.clone());

        let decomposer = ProcessCostDecomposer::new(config.process.clone(), resolver);
        let builder = CostTreeBuilder::new(Arc::new(source), decomposer)
            .with_fetch_timeout(config.allocation_timeout());

        Ok(Self::new(builder, store)
            .with_persist_timeout(config.persist_timeout())
            .with_metrics(metrics))
    }

    pub fn with_persist_timeout(mut self, timeout: Duration) -> Self {
        self.persist_timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<BillingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<BillingMetrics> {
        &self.metrics
    }

    pub async fn run(&self, n_months: u32) -> Result<JobReport> {
        self.run_at(Utc::now(), n_months).await
    }

    /// Computes each trailing month in turn. Every snapshot of the run shares
    /// `now` as `created_at`. The first failing window or write stops the run;
    /// snapshots already written stay.
    pub async fn run_at(&self, now: DateTime<Utc>, n_months: u32) -> Result<JobReport> {
        let mut report = JobReport::default();

        for window in trailing_month_windows(now, n_months)? {
            tracing::info!(window = %window, "Computing billing window");
            report.snapshots_written += self.run_window(&window, now).await?;
            report.windows.push(window);
        }

        tracing::info!(
            windows = report.windows.len(),
            snapshots = report.snapshots_written,
            "Billing run complete"
        );
        Ok(report)
    }

    /// Builds one window and stores one snapshot per user. Returns the number written.
    pub async fn run_window(&self, window: &Window, created_at: DateTime<Utc>) -> Result<usize> {
        let span = WindowSpan::new(window);
        let built = self
            .builder
            .build_cost_trees(window)
            .instrument(span.span().clone())
            .await;

        let trees = match built {
            Ok(trees) => trees,
            Err(e) => {
                self.metrics.record_window(false, 0, span.elapsed_ms());
                tracing::error!(window = %window, error = %e, "Window build failed");
                return Err(e);
            }
        };
        let latency_ms = span.finish(trees.len());
        self.metrics.record_window(true, trees.len(), latency_ms);

        let mut written = 0;
        for (user_id, tree) in trees {
            let snapshot = BillingSnapshot::new(&user_id, *window, created_at, tree);
            self.persist(&snapshot)
                .instrument(persist_span(&user_id, window))
                .await?;
            written += 1;
        }
        Ok(written)
    }

    async fn persist(&self, snapshot: &BillingSnapshot) -> Result<()> {
        let result = match tokio::time::timeout(self.persist_timeout, self.store.upsert(snapshot))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable {
                backend: self.store.name().to_string(),
                message: format!(
                    "write timed out after {:.1}s",
                    self.persist_timeout.as_secs_f64()
                ),
            }),
        };

        self.metrics.record_snapshot(result.is_ok());
        match result {
            Ok(()) => {
                tracing::debug!(user_id = %snapshot.user_id, "Snapshot stored");
                Ok(())
            }
            Err(e) => {
                tracing::error!(user_id = %snapshot.user_id, error = %e, "Snapshot write failed");
                Err(Error::Store(e))
            }
        }
    }
}

impl std::fmt::Debug for BillingJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BillingJob")
            .field("builder", &self.builder)
            .field("store", &self.store.name())
            .field("persist_timeout", &self.persist_timeout)
            .finish()
    }
}
