//! Redis snapshot store.
//!
//! Layout under the key prefix:
//! - `snapshot:{user}:{from}:{created_at}` JSON document
//! - `periods:{user}` sorted set of period starts (score = unix seconds)
//! - `runs:{user}:{from}` sorted set of snapshot keys (score = created_at millis)
//!
//! Enable with the `redis-backend` feature flag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;

use super::{
    RetryPolicy, SnapshotStore, StorageResultExt, StoreError, StoreResult, is_transient,
    with_retry,
};
use crate::model::{BillingSnapshot, SnapshotKey};

/// Deletes one run and drops its period once no run of that period is left.
///
/// KEYS: snapshot, runs set, periods set. ARGV: period start.
const REMOVE_SCRIPT: &str = r#"
local deleted = redis.call('DEL', KEYS[1])
redis.call('ZREM', KEYS[2], KEYS[1])
if redis.call('ZCARD', KEYS[2]) == 0 then
    redis.call('ZREM', KEYS[3], ARGV[1])
end
return deleted
"#;

#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub key_prefix: String,
    pub connection_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            key_prefix: "billing:".to_string(),
            connection_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl RedisConfig {
    pub fn prefix(mut self, prefix: impl Into<String>) -> StoreResult<Self> {
        let prefix = prefix.into();
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        {
            return Err(StoreError::Storage {
                message: format!(
                    "Invalid key prefix '{}': only ASCII alphanumeric, underscore, and colon allowed",
                    prefix
                ),
            });
        }
        self.key_prefix = prefix;
        Ok(self)
    }
}

pub struct RedisSnapshotStore {
    client: Arc<redis::Client>,
    config: RedisConfig,
}

impl RedisSnapshotStore {
    pub fn new(redis_url: &str) -> StoreResult<Self> {
        Self::from_config(redis_url, RedisConfig::default())
    }

    pub fn from_config(redis_url: &str, config: RedisConfig) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url).storage_err_ctx("connection")?;
        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn snapshot_key(&self, key: &SnapshotKey) -> String {
        format!(
            "{}snapshot:{}:{}:{}",
            self.config.key_prefix,
            key.user_id,
            key.from.timestamp(),
            key.created_at.timestamp_millis()
        )
    }

    fn periods_key(&self, user_id: &str) -> String {
        format!("{}periods:{}", self.config.key_prefix, user_id)
    }

    fn runs_key(&self, user_id: &str, from: DateTime<Utc>) -> String {
        format!("{}runs:{}:{}", self.config.key_prefix, user_id, from.timestamp())
    }

    /// One connection attempt bounded by `connection_timeout`.
    async fn connect(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        tokio::time::timeout(
            self.config.connection_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .storage_err_ctx("connection timeout")?
        .storage_err()
    }

    async fn get_connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        with_retry(self.config.retry, is_transient, || self.connect()).await
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn upsert(&self, snapshot: &BillingSnapshot) -> StoreResult<()> {
        let data = serde_json::to_string(snapshot)?;
        let key = self.snapshot_key(&snapshot.key());
        let periods_key = self.periods_key(&snapshot.user_id);
        let runs_key = self.runs_key(&snapshot.user_id, snapshot.from);

        with_retry(self.config.retry, is_transient, || async {
            let mut conn = self.connect().await?;
            let mut pipe = redis::pipe();
            pipe.atomic();
            pipe.cmd("SET").arg(&key).arg(&data);
            pipe.cmd("ZADD")
                .arg(&periods_key)
                .arg(snapshot.from.timestamp())
                .arg(snapshot.from.timestamp());
            pipe.cmd("ZADD")
                .arg(&runs_key)
                .arg(snapshot.created_at.timestamp_millis())
                .arg(&key);
            pipe.query_async::<()>(&mut conn).await.storage_err()
        })
        .await
    }

    async fn list_available_periods(&self, user_id: &str) -> StoreResult<Vec<DateTime<Utc>>> {
        let mut conn = self.get_connection().await?;
        let raw: Vec<i64> = conn
            .zrevrange(self.periods_key(user_id), 0, -1)
            .await
            .storage_err()?;

        raw.into_iter()
            .map(|secs| {
                DateTime::<Utc>::from_timestamp(secs, 0).ok_or_else(|| StoreError::Storage {
                    message: format!("invalid period timestamp {}", secs),
                })
            })
            .collect()
    }

    async fn get_snapshots(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<BillingSnapshot>> {
        let mut conn = self.get_connection().await?;
        let keys: Vec<String> = conn
            .zrevrange(self.runs_key(user_id, from), 0, -1)
            .await
            .storage_err()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let documents: Vec<Option<String>> = conn.mget(&keys).await.storage_err()?;
        documents
            .into_iter()
            .flatten()
            .map(|data| serde_json::from_str(&data).map_err(StoreError::from))
            .collect()
    }

    async fn remove(&self, key: &SnapshotKey) -> StoreResult<bool> {
        let mut conn = self.get_connection().await?;
        let deleted: usize = redis::Script::new(REMOVE_SCRIPT)
            .key(self.snapshot_key(key))
            .key(self.runs_key(&key.user_id, key.from))
            .key(self.periods_key(&key.user_id))
            .arg(key.from.timestamp())
            .invoke_async(&mut conn)
            .await
            .storage_err()?;
        Ok(deleted > 0)
    }
}
