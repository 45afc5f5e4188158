//! Configuration provider trait.

use std::str::FromStr;

use serde::de::DeserializeOwned;

use super::{ConfigError, ConfigResult};

/// Read-only source of raw configuration values.
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Raw value for a dotted key (`process.marshalling_cost_sources`).
    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;

    /// Keys known to this provider that start with `prefix`.
    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>>;
}

/// Typed access on top of [`ConfigProvider::get_raw`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Value deserialized from JSON.
    fn get<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        Self: Sync,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| ConfigError::invalid(key, e)),
                None => Ok(None),
            }
        }
    }

    /// Value parsed with [`FromStr`] (numbers, booleans, plain strings).
    fn get_parsed<T>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        Self: Sync,
        T: FromStr + Send,
        T::Err: std::fmt::Display,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => raw
                    .trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|e| ConfigError::invalid(key, e)),
                None => Ok(None),
            }
        }
    }

    /// List given either as a JSON array or comma separated.
    fn get_list(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = ConfigResult<Option<Vec<String>>>> + Send
    where
        Self: Sync,
    {
        async move {
            let Some(raw) = self.get_raw(key).await? else {
                return Ok(None);
            };
            let trimmed = raw.trim();
            if trimmed.starts_with('[') {
                return serde_json::from_str(trimmed)
                    .map(Some)
                    .map_err(|e| ConfigError::invalid(key, e));
            }
            Ok(Some(
                trimmed
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            ))
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}
