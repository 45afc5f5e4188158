//! Typed billing configuration loaded from a [`ConfigProvider`].

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::provider::{ConfigProvider, ConfigProviderExt};
use super::{ConfigError, ConfigProblems, ConfigResult};
use crate::metrics::QueryTemplate;
use crate::model::{MAX_TRAILING_MONTHS, RESERVED_PROCESS_CHILDREN};

pub const DEFAULT_ALLOCATION_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PERSIST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ALLOCATION_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_JOB_MONTHS: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub url: Option<String>,
    /// Postgres table name
    pub table: Option<String>,
    /// Redis key prefix
    pub prefix: Option<String>,
}

/// Which controllers count as process workloads and how their cost is split.
///
/// Source entries are full controller-granularity keys. The process name
/// shown in the tree is the part after the last `:` of the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessCostConfig {
    pub process_cost_sources: Vec<String>,
    pub marshalling_cost_sources: Vec<String>,
    pub process_io_cost_sources: Vec<String>,
    pub user_process_cost_fraction_query: QueryTemplate,
    pub process_marshaller_cost_fraction_query: QueryTemplate,
    pub user_marshaller_cost_fraction_query: QueryTemplate,
    pub user_process_io_cost_fraction_query: QueryTemplate,
    pub user_process_definition_cost_fraction_query: QueryTemplate,
    /// Process cost source → value substituted for `$instance_id`.
    /// Sources without an entry get no process-definition breakdown.
    pub process_definition_instance_ids: HashMap<String, String>,
}

impl ProcessCostConfig {
    pub fn is_process_source(&self, key: &str) -> bool {
        self.process_cost_sources.iter().any(|s| s == key)
    }

    pub fn is_marshalling_source(&self, key: &str) -> bool {
        self.marshalling_cost_sources.iter().any(|s| s == key)
    }

    pub fn is_process_io_source(&self, key: &str) -> bool {
        self.process_io_cost_sources.iter().any(|s| s == key)
    }

    pub fn instance_id(&self, key: &str) -> Option<&str> {
        self.process_definition_instance_ids
            .get(key)
            .map(String::as_str)
    }

    fn validate(&self, errors: &mut Vec<ConfigError>) {
        let mut seen = BTreeSet::new();
        for source in &self.process_cost_sources {
            let name = process_name(source);
            if RESERVED_PROCESS_CHILDREN.contains(&name) {
                errors.push(ConfigError::Invalid {
                    key: "process.process_cost_sources".into(),
                    message: format!("process name '{}' of '{}' is reserved", name, source),
                });
            }
            if !seen.insert(name) {
                errors.push(ConfigError::Invalid {
                    key: "process.process_cost_sources".into(),
                    message: format!("process name '{}' is configured twice", name),
                });
            }
        }

        for key in self.process_definition_instance_ids.keys() {
            if !self.is_process_source(key) {
                tracing::warn!(
                    source = %key,
                    "Instance id configured for a controller that is not a process cost source"
                );
            }
        }
    }
}

/// Trailing `:`-separated part of a controller key.
pub fn process_name(key: &str) -> &str {
    key.rsplit(':').next().unwrap_or(key)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingConfig {
    pub opencost_url: String,
    pub prometheus_url: String,
    pub allocation_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub persist_timeout_secs: u64,
    pub allocation_cache_ttl_secs: u64,
    /// Trailing months computed per job run
    pub job_months: u32,
    pub log_json: bool,
    pub store: StoreConfig,
    pub process: ProcessCostConfig,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            opencost_url: String::new(),
            prometheus_url: String::new(),
            allocation_timeout_secs: DEFAULT_ALLOCATION_TIMEOUT_SECS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            persist_timeout_secs: DEFAULT_PERSIST_TIMEOUT_SECS,
            allocation_cache_ttl_secs: DEFAULT_ALLOCATION_CACHE_TTL_SECS,
            job_months: DEFAULT_JOB_MONTHS,
            log_json: false,
            store: StoreConfig::default(),
            process: ProcessCostConfig::default(),
        }
    }
}

impl BillingConfig {
    /// Reads every key from `provider`, falling back to defaults, then validates.
    pub async fn load<P: ConfigProvider + ?Sized>(provider: &P) -> ConfigResult<Self> {
        let defaults = Self::default();

        let config = Self {
            opencost_url: provider
                .get_raw("opencost_url")
                .await?
                .unwrap_or_default(),
            prometheus_url: provider
                .get_raw("prometheus_url")
                .await?
                .unwrap_or_default(),
            allocation_timeout_secs: provider
                .get_parsed("allocation_timeout_secs")
                .await?
                .unwrap_or(defaults.allocation_timeout_secs),
            query_timeout_secs: provider
                .get_parsed("query_timeout_secs")
                .await?
                .unwrap_or(defaults.query_timeout_secs),
            persist_timeout_secs: provider
                .get_parsed("persist_timeout_secs")
                .await?
                .unwrap_or(defaults.persist_timeout_secs),
            allocation_cache_ttl_secs: provider
                .get_parsed("allocation_cache_ttl_secs")
                .await?
                .unwrap_or(defaults.allocation_cache_ttl_secs),
            job_months: provider
                .get_parsed("job_months")
                .await?
                .unwrap_or(defaults.job_months),
            log_json: provider
                .get_parsed("log_json")
                .await?
                .unwrap_or(defaults.log_json),
            store: StoreConfig {
                backend: provider
                    .get_parsed("store.backend")
                    .await?
                    .unwrap_or_default(),
                url: provider.get_raw("store.url").await?,
                table: provider.get_raw("store.table").await?,
                prefix: provider.get_raw("store.prefix").await?,
            },
            process: load_process(provider).await?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.opencost_url.trim().is_empty() {
            errors.push(ConfigError::Missing {
                key: "opencost_url".into(),
            });
        }
        if self.prometheus_url.trim().is_empty() {
            errors.push(ConfigError::Missing {
                key: "prometheus_url".into(),
            });
        }
        if self.job_months == 0 {
            errors.push(ConfigError::Invalid {
                key: "job_months".into(),
                message: "must be at least 1".into(),
            });
        } else if self.job_months > MAX_TRAILING_MONTHS {
            errors.push(ConfigError::Invalid {
                key: "job_months".into(),
                message: format!("must be at most {}", MAX_TRAILING_MONTHS),
            });
        }
        for (key, secs) in [
            ("allocation_timeout_secs", self.allocation_timeout_secs),
            ("query_timeout_secs", self.query_timeout_secs),
            ("persist_timeout_secs", self.persist_timeout_secs),
        ] {
            if secs == 0 {
                errors.push(ConfigError::Invalid {
                    key: key.into(),
                    message: "timeout must be positive".into(),
                });
            }
        }
        if self.store.backend != StoreBackend::Memory && self.store.url.is_none() {
            errors.push(ConfigError::Missing {
                key: "store.url".into(),
            });
        }
        self.process.validate(&mut errors);

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::Multiple(ConfigProblems(errors))),
        }
    }

    pub fn allocation_timeout(&self) -> Duration {
        Duration::from_secs(self.allocation_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_secs(self.persist_timeout_secs)
    }

    pub fn allocation_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.allocation_cache_ttl_secs)
    }
}

async fn load_process<P: ConfigProvider + ?Sized>(provider: &P) -> ConfigResult<ProcessCostConfig> {
    let template = |key: &'static str| async move {
        ConfigResult::Ok(
            provider
                .get_raw(key)
                .await?
                .map(QueryTemplate::from)
                .unwrap_or_default(),
        )
    };

    Ok(ProcessCostConfig {
        process_cost_sources: provider
            .get_list("process.process_cost_sources")
            .await?
            .unwrap_or_default(),
        marshalling_cost_sources: provider
            .get_list("process.marshalling_cost_sources")
            .await?
            .unwrap_or_default(),
        process_io_cost_sources: provider
            .get_list("process.process_io_cost_sources")
            .await?
            .unwrap_or_default(),
        user_process_cost_fraction_query: template("process.user_process_cost_fraction_query")
            .await?,
        process_marshaller_cost_fraction_query: template(
            "process.process_marshaller_cost_fraction_query",
        )
        .await?,
        user_marshaller_cost_fraction_query: template(
            "process.user_marshaller_cost_fraction_query",
        )
        .await?,
        user_process_io_cost_fraction_query: template(
            "process.user_process_io_cost_fraction_query",
        )
        .await?,
        user_process_definition_cost_fraction_query: template(
            "process.user_process_definition_cost_fraction_query",
        )
        .await?,
        process_definition_instance_ids: provider
            .get("process.process_definition_instance_ids")
            .await?
            .unwrap_or_default(),
    })
}
