//! Configuration provider trait.

use std::fmt::Display;
use std::str::FromStr;

use serde::de::DeserializeOwned;

use super::{ConfigError, ConfigResult};

/// Read-only source of dotted configuration keys (`metering.default_unit_cost`).
#[async_trait::async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>>;

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>>;
}

/// Typed accessors over [`ConfigProvider::get_raw`].
pub trait ConfigProviderExt: ConfigProvider {
    /// Parse with `FromStr`, which matches how environment values are written.
    fn get_parsed<T>(&self, key: &str) -> impl std::future::Future<Output = ConfigResult<Option<T>>> + Send
    where
        T: FromStr + Send,
        T::Err: Display,
        Self: Sync,
    {
        async move {
            match self.get_raw(key).await? {
                Some(raw) => raw
                    .trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    }),
                None => Ok(None),
            }
        }
    }

    /// Trimmed string value; blank counts as unset.
    fn get_string(&self, key: &str) -> impl std::future::Future<Output = ConfigResult<Option<String>>> + Send
    where
        Self: Sync,
    {
        async move {
            Ok(self
                .get_raw(key)
                .await?
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty()))
        }
    }

    /// Decode a JSON-encoded value (lists and maps).
    fn get_json<T: DeserializeOwned + Send>(
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
                    .map_err(|e| ConfigError::InvalidValue {
                        key: key.to_string(),
                        message: e.to_string(),
                    }),
                None => Ok(None),
            }
        }
    }
}

impl<P: ConfigProvider + ?Sized> ConfigProviderExt for P {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigProvider;

    #[tokio::test]
    async fn test_typed_access() {
        let provider = MemoryConfigProvider::new()
            .value("observer.alert_every", " 25 ")
            .value("observer.warn_utilization", "0.9")
            .value("metering.meter", "  ")
            .value("tools", r#"["send_reply","list_threads"]"#);

        let every: Option<u64> = provider.get_parsed("observer.alert_every").await.unwrap();
        assert_eq!(every, Some(25));
        let warn: Option<f64> = provider.get_parsed("observer.warn_utilization").await.unwrap();
        assert_eq!(warn, Some(0.9));
        assert_eq!(provider.get_string("metering.meter").await.unwrap(), None);

        let tools: Option<Vec<String>> = provider.get_json("tools").await.unwrap();
        assert_eq!(tools.map(|t| t.len()), Some(2));
    }

    #[tokio::test]
    async fn test_parse_failure_names_key() {
        let provider = MemoryConfigProvider::new().value("reconcile.interval_secs", "soon");
        let err = provider
            .get_parsed::<u64>("reconcile.interval_secs")
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "reconcile.interval_secs"));
    }
}
