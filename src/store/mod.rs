//! Snapshot persistence.
//!
//! A [`SnapshotStore`] keeps one immutable [`BillingSnapshot`] per
//! `(user_id, period_from, created_at)`. Writing the same identity twice
//! replaces the earlier record, so a retried write still leaves one record.

pub mod fields;
mod memory;
#[cfg(feature = "postgres")]
mod postgres_store;
#[cfg(feature = "redis-backend")]
mod redis_store;

pub use memory::MemorySnapshotStore;
#[cfg(feature = "postgres")]
pub use postgres_store::{PostgresConfig, PostgresSnapshotStore};
#[cfg(feature = "redis-backend")]
pub use redis_store::{RedisConfig, RedisSnapshotStore};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};
use crate::model::{BillingSnapshot, SnapshotKey};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend '{backend}' is not available: {message}")]
    Unavailable { backend: String, message: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    fn name(&self) -> &str;

    /// Creates the backing structures and indexes. Safe to call repeatedly.
    async fn migrate(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Replace-or-insert keyed by `(user_id, from, created_at)`.
    async fn upsert(&self, snapshot: &BillingSnapshot) -> StoreResult<()>;

    /// Distinct period starts stored for `user_id`, most recent first.
    async fn list_available_periods(&self, user_id: &str) -> StoreResult<Vec<DateTime<Utc>>>;

    /// Snapshots of one period, most recent `created_at` first.
    async fn get_snapshots(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<BillingSnapshot>>;

    /// Deletes one snapshot. Administrative only; returns whether it existed.
    async fn remove(&self, key: &SnapshotKey) -> StoreResult<bool>;
}

#[async_trait::async_trait]
impl<S: SnapshotStore + ?Sized> SnapshotStore for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn migrate(&self) -> StoreResult<()> {
        (**self).migrate().await
    }

    async fn upsert(&self, snapshot: &BillingSnapshot) -> StoreResult<()> {
        (**self).upsert(snapshot).await
    }

    async fn list_available_periods(&self, user_id: &str) -> StoreResult<Vec<DateTime<Utc>>> {
        (**self).list_available_periods(user_id).await
    }

    async fn get_snapshots(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<BillingSnapshot>> {
        (**self).get_snapshots(user_id, from).await
    }

    async fn remove(&self, key: &SnapshotKey) -> StoreResult<bool> {
        (**self).remove(key).await
    }
}

/// Creates stores from [`StoreConfig`].
pub struct StoreFactory;

impl StoreFactory {
    pub fn memory() -> Arc<dyn SnapshotStore> {
        Arc::new(MemorySnapshotStore::new())
    }

    /// Opens the configured backend and runs its migration.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Arc<dyn SnapshotStore>> {
        let store: Arc<dyn SnapshotStore> = match config.backend {
            StoreBackend::Memory => Self::memory(),
            StoreBackend::Postgres => Self::postgres(config).await?,
            StoreBackend::Redis => Self::redis(config)?,
        };
        store.migrate().await?;
        tracing::info!(backend = store.name(), "Snapshot store ready");
        Ok(store)
    }

    fn url(config: &StoreConfig) -> StoreResult<&str> {
        config.url.as_deref().ok_or_else(|| StoreError::Unavailable {
            backend: format!("{:?}", config.backend).to_lowercase(),
            message: "no url configured".into(),
        })
    }

    #[cfg(feature = "postgres")]
    async fn postgres(config: &StoreConfig) -> StoreResult<Arc<dyn SnapshotStore>> {
        let mut pg = PostgresConfig::default();
        if let Some(ref table) = config.table {
            pg = pg.table(table.clone())?;
        }
        Ok(Arc::new(
            PostgresSnapshotStore::connect(Self::url(config)?, pg).await?,
        ))
    }

    #[cfg(not(feature = "postgres"))]
    async fn postgres(config: &StoreConfig) -> StoreResult<Arc<dyn SnapshotStore>> {
        Self::url(config)?;
        Err(StoreError::Unavailable {
            backend: "postgres".into(),
            message: "built without the `postgres` feature".into(),
        })
    }

    #[cfg(feature = "redis-backend")]
    fn redis(config: &StoreConfig) -> StoreResult<Arc<dyn SnapshotStore>> {
        let mut rc = RedisConfig::default();
        if let Some(ref prefix) = config.prefix {
            rc = rc.prefix(prefix.clone())?;
        }
        Ok(Arc::new(RedisSnapshotStore::from_config(
            Self::url(config)?,
            rc,
        )?))
    }

    #[cfg(not(feature = "redis-backend"))]
    fn redis(config: &StoreConfig) -> StoreResult<Arc<dyn SnapshotStore>> {
        Self::url(config)?;
        Err(StoreError::Unavailable {
            backend: "redis".into(),
            message: "built without the `redis-backend` feature".into(),
        })
    }
}

/// Retry settings for network backends.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently or runs out of attempts.
pub(crate) async fn with_retry<F, Fut, T>(
    policy: RetryPolicy,
    is_retryable: impl Fn(&StoreError) -> bool,
    operation: F,
) -> StoreResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let mut attempt = 0;
    let mut backoff = policy.initial_backoff;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                attempt += 1;
                tracing::warn!(
                    attempt = attempt,
                    error = %e,
                    "Retrying storage operation after transient failure"
                );
                // Symmetrical 10% jitter
                let jitter_factor = 1.0 + (rand::random::<f64>() * 0.2 - 0.1);
                tokio::time::sleep(backoff.mul_f64(jitter_factor)).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Message-based transient failure detection shared by the network backends.
pub(crate) fn is_transient(error: &StoreError) -> bool {
    match error {
        StoreError::Storage { message } => {
            let message = message.to_ascii_lowercase();
            message.contains("timeout")
                || message.contains("timed out")
                || message.contains("connection")
                || message.contains("busy")
                || message.contains("loading")
                || message.contains("clusterdown")
        }
        StoreError::Unavailable { .. } => true,
        StoreError::Serialization(_) => false,
    }
}

#[cfg(any(feature = "postgres", feature = "redis-backend"))]
pub(crate) trait StorageResultExt<T> {
    fn storage_err(self) -> StoreResult<T>;
    fn storage_err_ctx(self, context: &str) -> StoreResult<T>;
}

#[cfg(any(feature = "postgres", feature = "redis-backend"))]
impl<T, E: std::fmt::Display> StorageResultExt<T> for std::result::Result<T, E> {
    fn storage_err(self) -> StoreResult<T> {
        self.map_err(|e| StoreError::Storage {
            message: e.to_string(),
        })
    }

    fn storage_err_ctx(self, context: &str) -> StoreResult<T> {
        self.map_err(|e| StoreError::Storage {
            message: format!("{}: {}", context, e),
        })
    }
}
