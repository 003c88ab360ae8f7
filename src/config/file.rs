//! File-based configuration provider.
//!
//! YAML (`.yaml`/`.yml`) or JSON (anything else). Nested maps are flattened
//! into dotted keys when the file is loaded:
//!
//! ```yaml
//! metering:
//!   default_unit_cost: 2
//! ```
//!
//! is read back as `metering.default_unit_cost = "2"`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::sync::OnceCell;

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

pub struct FileConfigProvider {
    path: PathBuf,
    required: bool,
    data: OnceCell<HashMap<String, String>>,
}

impl FileConfigProvider {
    /// Provider for a file that must exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            required: true,
            data: OnceCell::new(),
        }
    }

    /// Provider that behaves as empty when the file is absent.
    pub fn optional(path: impl Into<PathBuf>) -> Self {
        Self {
            required: false,
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_yaml(&self) -> bool {
        matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        )
    }

    async fn load(&self) -> ConfigResult<HashMap<String, String>> {
        if !self.required && !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(HashMap::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let root: Value = if self.is_yaml() {
            serde_yaml_ng::from_str(&content).map_err(|e| ConfigError::Yaml {
                message: format!("{}: {}", self.path.display(), e),
            })?
        } else {
            serde_json::from_str(&content)?
        };

        let mut flat = HashMap::new();
        flatten("", &root, &mut flat);
        tracing::debug!(path = %self.path.display(), keys = flat.len(), "Loaded config file");
        Ok(flat)
    }

    async fn data(&self) -> ConfigResult<&HashMap<String, String>> {
        self.data.get_or_try_init(|| self.load()).await
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten(&key, v, out);
            }
        }
        Value::Null => {}
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[async_trait::async_trait]
impl ConfigProvider for FileConfigProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.data().await?.get(key).cloned())
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        Ok(self
            .data()
            .await?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

impl std::fmt::Debug for FileConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileConfigProvider")
            .field("path", &self.path)
            .field("required", &self.required)
            .finish()
    }
}
