//! Ordered stack of providers.

use std::collections::BTreeSet;

use super::ConfigResult;
use super::provider::ConfigProvider;

/// Answers each key from the first layer that has it.
#[derive(Default)]
pub struct CompositeConfigProvider {
    layers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer below the existing ones.
    pub fn push(&mut self, provider: Box<dyn ConfigProvider>) {
        self.layers.push(provider);
    }

    pub fn with(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.push(Box::new(provider));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for CompositeConfigProvider {
    fn name(&self) -> &str {
        "composite"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        for layer in &self.layers {
            let Some(value) = layer.get_raw(key).await? else {
                continue;
            };
            tracing::trace!(key, layer = layer.name(), "Setting resolved");
            return Ok(Some(value));
        }
        Ok(None)
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let mut keys = BTreeSet::new();
        for layer in &self.layers {
            keys.extend(layer.list_keys(prefix).await?);
        }
        Ok(keys.into_iter().collect())
    }
}

impl std::fmt::Debug for CompositeConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
