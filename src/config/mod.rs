//! Layered configuration for the entitlement gate.
//!
//! ```rust,no_run
//! use entitlement_gate::config::{ConfigBuilder, EntitlementSettings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigBuilder::new()
//!     .env()
//!     .optional_file("entitlements.yaml")
//!     .build()
//!     .await?;
//! let settings = EntitlementSettings::load(&config).await?;
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
pub use env::{ENV_PREFIX, EnvConfigProvider};
pub use file::FileConfigProvider;
pub use memory::MemoryConfigProvider;
pub use provider::{ConfigProvider, ConfigProviderExt};
pub use settings::{
    DEFAULT_PAST_DUE_GRACE_DAYS, DEFAULT_RECONCILE_INTERVAL, DEFAULT_UNIT_COST, DatabaseSettings,
    EntitlementSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {message}")]
    Yaml { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Environment error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("Provider error: {message}")]
    Provider { message: String },

    /// Every problem found while validating settings.
    #[error("{0}")]
    ValidationErrors(ValidationErrors),
}

#[derive(Debug)]
pub struct ValidationErrors(pub Vec<ConfigError>);

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation failed: ")?;
        let msgs: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", msgs.join("; "))
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Providers are consulted in the order they are added; the first hit wins.
pub struct ConfigBuilder {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Environment variables under [`ENV_PREFIX`].
    pub fn env(mut self) -> Self {
        self.providers.push(Box::new(EnvConfigProvider::new()));
        self
    }

    pub fn env_with_prefix(mut self, prefix: &str) -> Self {
        self.providers.push(Box::new(EnvConfigProvider::prefixed(prefix)));
        self
    }

    pub fn file(mut self, path: impl AsRef<std::path::Path>) -> Self {
        self.providers
            .push(Box::new(FileConfigProvider::new(path.as_ref())));
        self
    }

    pub fn optional_file(mut self, path: impl AsRef<std::path::Path>) -> Self {
        self.providers
            .push(Box::new(FileConfigProvider::optional(path.as_ref())));
        self
    }

    pub fn memory(mut self, provider: MemoryConfigProvider) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub async fn build(self) -> ConfigResult<CompositeConfigProvider> {
        let mut composite = CompositeConfigProvider::new();
        for provider in self.providers {
            composite.add_provider(provider);
        }
        Ok(composite)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NotFound {
            key: "database.url".to_string(),
        };
        assert!(err.to_string().contains("database.url"));
    }

    #[test]
    fn test_validation_errors_display() {
        let err = ConfigError::ValidationErrors(ValidationErrors(vec![
            ConfigError::NotFound { key: "a".into() },
            ConfigError::Provider { message: "b".into() },
        ]));
        let text = err.to_string();
        assert!(text.starts_with("Validation failed: "));
        assert!(text.contains("Key not found: a; Provider error: b"));
    }

    #[tokio::test]
    async fn test_builder_layers_in_order() {
        let config = ConfigBuilder::new()
            .memory(MemoryConfigProvider::named("override").value("metering.meter", "seats"))
            .memory(
                MemoryConfigProvider::named("base")
                    .value("metering.meter", "mcp_units")
                    .value("observer.alert_every", "3"),
            )
            .optional_file("/nonexistent/entitlements.yaml")
            .build()
            .await
            .unwrap();

        let settings = EntitlementSettings::load(&config).await.unwrap();
        assert_eq!(settings.meter, "seats");
        assert_eq!(settings.observer.alert_every, 3);
    }
}
