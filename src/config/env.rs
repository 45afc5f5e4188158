//! Environment variable configuration provider.

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

/// Default prefix of billing environment variables.
pub const DEFAULT_ENV_PREFIX: &str = "BILLING_";

/// Maps dotted keys to prefixed upper-case variables:
/// `process.process_cost_sources` → `BILLING_PROCESS_PROCESS_COST_SOURCES`.
#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: String,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::prefixed(DEFAULT_ENV_PREFIX)
    }

    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn env_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase().replace('.', "_"))
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for EnvConfigProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        match std::env::var(self.env_key(key)) {
            Ok(value) => Ok(Some(value)),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
                var: self.env_key(key),
            }),
        }
    }

    /// Variable names are not reversible to dotted keys; returns the
    /// unprefixed lower-case names.
    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let env_prefix = self.env_key(prefix);
        Ok(std::env::vars()
            .filter(|(k, _)| k.starts_with(&env_prefix))
            .map(|(k, _)| k[self.prefix.len()..].to_lowercase())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key_conversion() {
        let provider = EnvConfigProvider::new();
        assert_eq!(provider.env_key("opencost_url"), "BILLING_OPENCOST_URL");
        assert_eq!(
            provider.env_key("process.process_cost_sources"),
            "BILLING_PROCESS_PROCESS_COST_SOURCES"
        );
    }

    #[tokio::test]
    async fn test_env_provider_get() {
        let provider = EnvConfigProvider::prefixed("TEST_BILLING_ENV_");

        // SAFETY: Test-only environment setup
        unsafe { std::env::set_var("TEST_BILLING_ENV_JOB_MONTHS", "3") };
        assert_eq!(
            provider.get_raw("job_months").await.unwrap(),
            Some("3".to_string())
        );
        assert_eq!(
            provider.list_keys("job").await.unwrap(),
            vec!["job_months".to_string()]
        );
        unsafe { std::env::remove_var("TEST_BILLING_ENV_JOB_MONTHS") };
    }

    #[tokio::test]
    async fn test_env_provider_not_found() {
        let provider = EnvConfigProvider::prefixed("NONEXISTENT_BILLING_PREFIX_");
        assert_eq!(provider.get_raw("some.key").await.unwrap(), None);
    }
}
