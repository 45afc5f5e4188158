//! JSON config file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::ConfigResult;
use super::provider::ConfigProvider;

/// Lazily parsed JSON document. `store.url` addresses `{"store": {"url": ..}}`.
pub struct FileConfigProvider {
    path: PathBuf,
    document: RwLock<Option<Arc<Value>>>,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Discards the parsed document; the next read parses the file again.
    pub async fn reload(&self) -> ConfigResult<()> {
        let fresh = self.parse().await?;
        *self.document.write().await = Some(fresh);
        Ok(())
    }

    async fn parse(&self) -> ConfigResult<Arc<Value>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Config file absent");
                return Ok(Arc::new(Value::Null));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Arc::new(serde_json::from_str(&text)?))
    }

    async fn document(&self) -> ConfigResult<Arc<Value>> {
        if let Some(doc) = self.document.read().await.as_ref() {
            return Ok(Arc::clone(doc));
        }
        let mut slot = self.document.write().await;
        match slot.as_ref() {
            Some(doc) => Ok(Arc::clone(doc)),
            None => {
                let doc = self.parse().await?;
                *slot = Some(Arc::clone(&doc));
                Ok(doc)
            }
        }
    }
}

/// Dotted key to JSON pointer (`a.b` → `/a/b`).
fn pointer(key: &str) -> String {
    key.split('.')
        .map(|part| format!("/{}", part.replace('~', "~0").replace('/', "~1")))
        .collect()
}

fn leaf_keys(value: &Value, prefix: &str, out: &mut Vec<String>) {
    let Value::Object(map) = value else {
        if !prefix.is_empty() {
            out.push(prefix.to_string());
        }
        return;
    };
    for (name, child) in map {
        let key = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", prefix, name)
        };
        leaf_keys(child, &key, out);
    }
}

#[async_trait::async_trait]
impl ConfigProvider for FileConfigProvider {
    fn name(&self) -> &str {
        "file"
    }

    /// Strings come back unquoted; arrays, objects and numbers as JSON text.
    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        let document = self.document().await?;
        Ok(match document.pointer(&pointer(key)) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let document = self.document().await?;
        let mut keys = Vec::new();
        leaf_keys(&document, "", &mut keys);
        keys.retain(|k| k.starts_with(prefix));
        Ok(keys)
    }
}

impl std::fmt::Debug for FileConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileConfigProvider({})", self.path.display())
    }
}
