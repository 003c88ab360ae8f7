//! In-memory configuration provider for tests and code-defined settings.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::ConfigResult;
use super::provider::ConfigProvider;

#[derive(Debug)]
pub struct MemoryConfigProvider {
    data: RwLock<HashMap<String, String>>,
    name: String,
}

impl Default for MemoryConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            name: name.into(),
        }
    }

    pub fn from_data(data: HashMap<String, String>) -> Self {
        Self {
            data: RwLock::new(data),
            name: "memory".to_string(),
        }
    }

    /// Builder-style insert used before the provider is shared.
    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.get_mut().insert(key.into(), value.into());
        self
    }

    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().await.insert(key.into(), value.into());
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.data.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for MemoryConfigProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_provider_basic() {
        let provider = MemoryConfigProvider::new().value("metering.meter", "mcp_units");
        assert_eq!(
            provider.get_raw("metering.meter").await.unwrap(),
            Some("mcp_units".to_string())
        );
        assert_eq!(provider.get_raw("nonexistent").await.unwrap(), None);

        provider.insert("metering.meter", "api_calls").await;
        assert_eq!(
            provider.get_raw("metering.meter").await.unwrap(),
            Some("api_calls".to_string())
        );
        assert!(provider.remove("metering.meter").await);
        assert!(provider.is_empty().await);
    }

    #[tokio::test]
    async fn test_memory_provider_list_keys() {
        let provider = MemoryConfigProvider::new()
            .value("observer.warn_utilization", "0.8")
            .value("observer.alert_every", "10")
            .value("reconcile.interval_secs", "300");

        let mut keys = provider.list_keys("observer.").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["observer.alert_every", "observer.warn_utilization"]);
    }

    #[tokio::test]
    async fn test_memory_provider_with_data() {
        let mut data = HashMap::new();
        data.insert("database.url".to_string(), "postgres://localhost/gate".to_string());
        let provider = MemoryConfigProvider::from_data(data);
        assert_eq!(provider.len().await, 1);
    }
}
