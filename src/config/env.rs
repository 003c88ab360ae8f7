//! Environment variable provider.
//!
//! `metering.default_unit_cost` with prefix `ENTITLEMENTS_` reads
//! `ENTITLEMENTS_METERING_DEFAULT_UNIT_COST`.

use super::provider::ConfigProvider;
use super::{ConfigError, ConfigResult};

/// Prefix used by [`EnvConfigProvider::default`].
pub const ENV_PREFIX: &str = "ENTITLEMENTS_";

#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    prefix: String,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::prefixed(ENV_PREFIX)
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
            Err(e) => Err(ConfigError::Env(e)),
        }
    }

    /// Returns variable names with the prefix stripped and lowercased.
    ///
    /// Underscores are ambiguous between segments and words, so these are not
    /// round-trippable dotted keys.
    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let env_prefix = self.env_key(prefix);
        Ok(std::env::vars()
            .filter_map(|(k, _)| {
                k.starts_with(&env_prefix)
                    .then(|| k[self.prefix.len()..].to_lowercase())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key_conversion() {
        let provider = EnvConfigProvider::new();
        assert_eq!(
            provider.env_key("metering.default_unit_cost"),
            "ENTITLEMENTS_METERING_DEFAULT_UNIT_COST"
        );

        let provider = EnvConfigProvider::prefixed("GATE_");
        assert_eq!(provider.env_key("database.url"), "GATE_DATABASE_URL");
    }

    #[tokio::test]
    async fn test_env_provider_get() {
        let provider = EnvConfigProvider::prefixed("ENTITLEMENTS_ENV_TEST_");

        // SAFETY: Test-only environment setup with a key no other test touches.
        unsafe { std::env::set_var("ENTITLEMENTS_ENV_TEST_OBSERVER_ALERT_EVERY", "5") };
        let value = provider.get_raw("observer.alert_every").await.unwrap();
        assert_eq!(value, Some("5".to_string()));

        let keys = provider.list_keys("observer").await.unwrap();
        assert_eq!(keys, vec!["observer_alert_every".to_string()]);
        unsafe { std::env::remove_var("ENTITLEMENTS_ENV_TEST_OBSERVER_ALERT_EVERY") };
    }

    #[tokio::test]
    async fn test_env_provider_not_found() {
        let provider = EnvConfigProvider::prefixed("NONEXISTENT_PREFIX_");
        assert_eq!(provider.get_raw("some.key").await.unwrap(), None);
    }
}
