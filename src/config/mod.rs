//! Layered settings for the billing job.
//!
//! Settings are read through [`ConfigProvider`]s stacked by [`ConfigBuilder`];
//! the first provider that knows a key answers it.
//!
//! ```rust,no_run
//! use cluster_billing::config::{BillingConfig, ConfigBuilder};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = ConfigBuilder::new()
//!     .env()
//!     .file("billing.json")
//!     .build();
//! let config = BillingConfig::load(&provider).await?;
//! # Ok(())
//! # }
//! ```

pub mod composite;
pub mod env;
pub mod file;
pub mod memory;
pub mod provider;
pub mod settings;

pub use composite::CompositeConfigProvider;
pub use env::{DEFAULT_ENV_PREFIX, EnvConfigProvider};
pub use file::FileConfigProvider;
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};
pub use settings::{BillingConfig, ProcessCostConfig, StoreBackend, StoreConfig};

use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting '{key}'")]
    Missing { key: String },

    #[error("invalid setting '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("malformed config document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("environment variable {var} is not valid unicode")]
    NotUnicode { var: String },

    #[error("cannot build {component} client: {message}")]
    Client {
        component: &'static str,
        message: String,
    },

    #[error("{0}")]
    Multiple(ConfigProblems),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, message: impl ToString) -> Self {
        Self::Invalid {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

/// Every problem found by one validation pass.
#[derive(Debug)]
pub struct ConfigProblems(pub Vec<ConfigError>);

impl std::fmt::Display for ConfigProblems {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} configuration problems", self.0.len())?;
        for (i, problem) in self.0.iter().enumerate() {
            write!(f, "{} {}", if i == 0 { ":" } else { ";" }, problem)?;
        }
        Ok(())
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Stacks providers; the first one added wins on conflicting keys.
#[derive(Default)]
pub struct ConfigBuilder {
    layers: CompositeConfigProvider,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `BILLING_*` environment variables
    pub fn env(self) -> Self {
        self.layer(EnvConfigProvider::new())
    }

    pub fn env_with_prefix(self, prefix: &str) -> Self {
        self.layer(EnvConfigProvider::prefixed(prefix))
    }

    /// JSON file; a missing file contributes nothing.
    pub fn file(self, path: impl AsRef<Path>) -> Self {
        self.layer(FileConfigProvider::new(path.as_ref()))
    }

    pub fn memory(self, provider: MemoryConfigProvider) -> Self {
        self.layer(provider)
    }

    pub fn layer(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.layers.push(Box::new(provider));
        self
    }

    pub fn build(self) -> CompositeConfigProvider {
        self.layers
    }
}
