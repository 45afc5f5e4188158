//! PostgreSQL snapshot store.
//!
//! Enable with the `postgres` feature flag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use super::fields::{
    CREATED_AT, PERIOD_FROM, PERIOD_TO, TREE, USER_FROM_CREATED_AT_INDEX,
    USER_FROM_CREATED_AT_INDEX_FIELDS, USER_FROM_INDEX, USER_FROM_INDEX_FIELDS, USER_ID,
};
use super::{
    RetryPolicy, SnapshotStore, StorageResultExt, StoreError, StoreResult, is_transient,
    with_retry,
};
use crate::model::{BillingSnapshot, CostTree, SnapshotKey};

#[derive(Clone, Debug)]
pub struct PostgresConfig {
    pub table: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            table: "billing_snapshots".to_string(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

impl PostgresConfig {
    pub fn table(mut self, table: impl Into<String>) -> StoreResult<Self> {
        let table = table.into();
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StoreError::Storage {
                message: format!(
                    "Invalid table name '{}': only ASCII alphanumeric and underscore allowed",
                    table
                ),
            });
        }
        self.table = table;
        Ok(self)
    }
}

pub struct PostgresSnapshotStore {
    pool: Arc<PgPool>,
    config: PostgresConfig,
}

impl PostgresSnapshotStore {
    pub async fn connect(database_url: &str, config: PostgresConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await
            .storage_err_ctx("connection")?;
        Ok(Self::with_pool(Arc::new(pool), config))
    }

    pub fn with_pool(pool: Arc<PgPool>, config: PostgresConfig) -> Self {
        Self { pool, config }
    }

    fn table(&self) -> &str {
        &self.config.table
    }

    fn decode(row: &sqlx::postgres::PgRow) -> StoreResult<BillingSnapshot> {
        let tree: serde_json::Value = row.try_get(TREE).storage_err()?;
        Ok(BillingSnapshot {
            user_id: row.try_get(USER_ID).storage_err()?,
            from: row.try_get(PERIOD_FROM).storage_err()?,
            to: row.try_get(PERIOD_TO).storage_err()?,
            created_at: row.try_get(CREATED_AT).storage_err()?,
            tree: serde_json::from_value::<CostTree>(tree)?,
        })
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn migrate(&self) -> StoreResult<()> {
        let table = self.table();
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    {USER_ID} TEXT NOT NULL,
                    {PERIOD_FROM} TIMESTAMPTZ NOT NULL,
                    {PERIOD_TO} TIMESTAMPTZ NOT NULL,
                    {CREATED_AT} TIMESTAMPTZ NOT NULL,
                    {TREE} JSONB NOT NULL
                )"
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {table}_{USER_FROM_INDEX} ON {table} ({})",
                USER_FROM_INDEX_FIELDS.join(", ")
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {table}_{USER_FROM_CREATED_AT_INDEX} ON {table} ({})",
                USER_FROM_CREATED_AT_INDEX_FIELDS.join(", ")
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .storage_err_ctx("migrate")?;
        }
        tracing::info!(table, "Snapshot table migrated");
        Ok(())
    }

    async fn upsert(&self, snapshot: &BillingSnapshot) -> StoreResult<()> {
        let tree = serde_json::to_value(&snapshot.tree)?;
        let table = self.table();
        let query = format!(
            "INSERT INTO {table} ({USER_ID}, {PERIOD_FROM}, {PERIOD_TO}, {CREATED_AT}, {TREE})
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT ({}) DO UPDATE SET
                {PERIOD_TO} = EXCLUDED.{PERIOD_TO},
                {TREE} = EXCLUDED.{TREE}",
            USER_FROM_CREATED_AT_INDEX_FIELDS.join(", ")
        );

        with_retry(self.config.retry, is_transient, || async {
            sqlx::query(&query)
                .bind(&snapshot.user_id)
                .bind(snapshot.from)
                .bind(snapshot.to)
                .bind(snapshot.created_at)
                .bind(&tree)
                .execute(&*self.pool)
                .await
                .storage_err()
                .map(|_| ())
        })
        .await
    }

    async fn list_available_periods(&self, user_id: &str) -> StoreResult<Vec<DateTime<Utc>>> {
        let query = format!(
            "SELECT DISTINCT {PERIOD_FROM} FROM {} WHERE {USER_ID} = $1 ORDER BY {PERIOD_FROM} DESC",
            self.table()
        );

        let rows = with_retry(self.config.retry, is_transient, || async {
            sqlx::query(&query)
                .bind(user_id)
                .fetch_all(&*self.pool)
                .await
                .storage_err()
        })
        .await?;

        rows.iter()
            .map(|row| row.try_get::<DateTime<Utc>, _>(PERIOD_FROM).storage_err())
            .collect()
    }

    async fn get_snapshots(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
    ) -> StoreResult<Vec<BillingSnapshot>> {
        let query = format!(
            "SELECT {USER_ID}, {PERIOD_FROM}, {PERIOD_TO}, {CREATED_AT}, {TREE} FROM {}
             WHERE {USER_ID} = $1 AND {PERIOD_FROM} = $2 ORDER BY {CREATED_AT} DESC",
            self.table()
        );

        let rows = with_retry(self.config.retry, is_transient, || async {
            sqlx::query(&query)
                .bind(user_id)
                .bind(from)
                .fetch_all(&*self.pool)
                .await
                .storage_err()
        })
        .await?;

        rows.iter().map(Self::decode).collect()
    }

    async fn remove(&self, key: &SnapshotKey) -> StoreResult<bool> {
        let query = format!(
            "DELETE FROM {} WHERE {USER_ID} = $1 AND {PERIOD_FROM} = $2 AND {CREATED_AT} = $3",
            self.table()
        );
        let result = sqlx::query(&query)
            .bind(&key.user_id)
            .bind(key.from)
            .bind(key.created_at)
            .execute(&*self.pool)
            .await
            .storage_err()?;
        Ok(result.rows_affected() > 0)
    }
}
