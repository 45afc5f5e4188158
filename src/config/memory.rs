//! Settings defined in code, mostly for tests and overrides.

use std::collections::BTreeMap;

use super::ConfigResult;
use super::provider::ConfigProvider;

#[derive(Debug, Default, Clone)]
pub struct MemoryConfigProvider {
    name: String,
    values: BTreeMap<String, String>,
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for MemoryConfigProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        // Sorted map: matching keys form one contiguous range.
        Ok(self
            .values
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::provider::ConfigProviderExt;

    #[tokio::test]
    async fn test_memory_provider_typed() {
        let provider = MemoryConfigProvider::new()
            .value("job_months", "3")
            .value("sources", "a, b,,c")
            .value("json_sources", "[\"x\",\"y\"]")
            .value("ids", "{\"x\":\"pe-0\"}");

        let months: Option<u32> = provider.get_parsed("job_months").await.unwrap();
        assert_eq!(months, Some(3));

        assert_eq!(
            provider.get_list("sources").await.unwrap(),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(
            provider.get_list("json_sources").await.unwrap(),
            Some(vec!["x".to_string(), "y".to_string()])
        );

        let ids: Option<std::collections::HashMap<String, String>> = provider.get("ids").await.unwrap();
        assert_eq!(ids.unwrap()["x"], "pe-0");
    }

    #[tokio::test]
    async fn test_memory_provider_invalid_number() {
        let provider = MemoryConfigProvider::new().value("job_months", "three");
        let result: ConfigResult<Option<u32>> = provider.get_parsed("job_months").await;
        assert!(result.is_err());
    }
}
