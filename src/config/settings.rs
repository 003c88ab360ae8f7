//! Typed settings for the entitlement service and the reconciliation sweep.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use super::provider::{ConfigProvider, ConfigProviderExt};
use super::{ConfigError, ConfigResult, ValidationErrors};
use crate::entitlements::CostTable;
use crate::observability::ObserverConfig;
use crate::types::METER_MCP_UNITS;

pub const DEFAULT_UNIT_COST: i64 = 1;
pub const DEFAULT_PAST_DUE_GRACE_DAYS: i64 = 7;
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default)]
pub struct DatabaseSettings {
    pub url: Option<SecretString>,
    pub statement_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct EntitlementSettings {
    pub meter: String,
    /// Tool costs with the default unit cost already resolved.
    pub costs: CostTable,
    pub tool_cost_path: Option<PathBuf>,
    pub past_due_grace_days: i64,
    pub observer: ObserverConfig,
    pub reconcile_interval: Duration,
    pub database: DatabaseSettings,
}

impl Default for EntitlementSettings {
    fn default() -> Self {
        Self {
            meter: METER_MCP_UNITS.to_string(),
            costs: CostTable::new(DEFAULT_UNIT_COST),
            tool_cost_path: None,
            past_due_grace_days: DEFAULT_PAST_DUE_GRACE_DAYS,
            observer: ObserverConfig::default(),
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            database: DatabaseSettings::default(),
        }
    }
}

/// Collects every bad key instead of stopping at the first.
#[derive(Default)]
struct Collector {
    errors: Vec<ConfigError>,
}

impl Collector {
    fn take<T>(&mut self, result: ConfigResult<Option<T>>) -> Option<T> {
        match result {
            Ok(value) => value,
            Err(e) => {
                self.errors.push(e);
                None
            }
        }
    }

    fn check(&mut self, ok: bool, key: &str, message: impl Into<String>) {
        if !ok {
            self.errors.push(ConfigError::InvalidValue {
                key: key.to_string(),
                message: message.into(),
            });
        }
    }
}

impl EntitlementSettings {
    /// Read and validate settings, falling back to defaults for absent keys.
    ///
    /// When `metering.tool_cost_path` is set the YAML cost table is loaded;
    /// an explicit `metering.default_unit_cost` overrides the table's default.
    pub async fn load(provider: &dyn ConfigProvider) -> ConfigResult<Self> {
        let mut settings = Self::default();
        let mut c = Collector::default();

        if let Some(meter) = c.take(provider.get_string("metering.meter").await) {
            settings.meter = meter;
        }

        settings.tool_cost_path = c
            .take(provider.get_string("metering.tool_cost_path").await)
            .map(PathBuf::from);
        if let Some(path) = &settings.tool_cost_path {
            match CostTable::load(path) {
                Ok(table) => settings.costs = table,
                Err(e) => c.errors.push(ConfigError::InvalidValue {
                    key: "metering.tool_cost_path".into(),
                    message: e.to_string(),
                }),
            }
        }

        match c.take(provider.get_parsed::<i64>("metering.default_unit_cost").await) {
            Some(cost) => {
                c.check(cost > 0, "metering.default_unit_cost", "must be positive");
                settings.costs.default_unit_cost = cost;
            }
            None if settings.costs.default_unit_cost <= 0 => {
                settings.costs.default_unit_cost = DEFAULT_UNIT_COST;
            }
            None => {}
        }

        if let Some(days) = c.take(provider.get_parsed::<i64>("metering.past_due_grace_days").await) {
            c.check(days >= 0, "metering.past_due_grace_days", "must not be negative");
            settings.past_due_grace_days = days;
        }

        if let Some(warn) = c.take(provider.get_parsed::<f64>("observer.warn_utilization").await) {
            c.check(
                warn > 0.0 && warn <= 1.0,
                "observer.warn_utilization",
                "must be in (0, 1]",
            );
            settings.observer.warn_utilization = warn;
        }

        if let Some(every) = c.take(provider.get_parsed::<u64>("observer.alert_every").await) {
            c.check(every >= 1, "observer.alert_every", "must be at least 1");
            settings.observer = settings.observer.alert_every(every);
        }

        if let Some(secs) = c.take(provider.get_parsed::<u64>("reconcile.interval_secs").await) {
            c.check(secs >= 1, "reconcile.interval_secs", "must be at least 1");
            settings.reconcile_interval = Duration::from_secs(secs.max(1));
        }

        settings.database.url = c
            .take(provider.get_string("database.url").await)
            .map(SecretString::from);

        if let Some(ms) = c.take(provider.get_parsed::<u64>("database.statement_timeout_ms").await) {
            c.check(ms >= 1, "database.statement_timeout_ms", "must be at least 1");
            settings.database.statement_timeout = Some(Duration::from_millis(ms));
        }

        c.check(!settings.meter.is_empty(), "metering.meter", "must not be empty");

        match c.errors.len() {
            0 => Ok(settings),
            1 => Err(c.errors.remove(0)),
            _ => Err(ConfigError::ValidationErrors(ValidationErrors(c.errors))),
        }
    }

    /// Fails with `NotFound` when no database URL was configured.
    pub fn require_database_url(&self) -> ConfigResult<&SecretString> {
        self.database.url.as_ref().ok_or_else(|| ConfigError::NotFound {
            key: "database.url".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfigProvider;
    use secrecy::ExposeSecret;
    use std::io::Write;

    #[tokio::test]
    async fn test_defaults() {
        let settings = EntitlementSettings::load(&MemoryConfigProvider::new())
            .await
            .unwrap();
        assert_eq!(settings.meter, "mcp_units");
        assert_eq!(settings.costs.cost_for("anything"), 1);
        assert_eq!(settings.past_due_grace_days, 7);
        assert_eq!(settings.observer, ObserverConfig::default());
        assert_eq!(settings.reconcile_interval, Duration::from_secs(300));
        assert!(settings.require_database_url().is_err());
    }

    #[tokio::test]
    async fn test_overrides() {
        let provider = MemoryConfigProvider::new()
            .value("metering.default_unit_cost", "3")
            .value("metering.past_due_grace_days", "14")
            .value("observer.warn_utilization", "0.9")
            .value("observer.alert_every", "5")
            .value("reconcile.interval_secs", "60")
            .value("database.url", "postgres://localhost/gate")
            .value("database.statement_timeout_ms", "2500");

        let settings = EntitlementSettings::load(&provider).await.unwrap();
        assert_eq!(settings.costs.default_unit_cost, 3);
        assert_eq!(settings.past_due_grace_days, 14);
        assert_eq!(settings.observer.warn_utilization, 0.9);
        assert_eq!(settings.observer.alert_every, 5);
        assert_eq!(settings.reconcile_interval, Duration::from_secs(60));
        assert_eq!(
            settings.require_database_url().unwrap().expose_secret(),
            "postgres://localhost/gate"
        );
        assert_eq!(
            settings.database.statement_timeout,
            Some(Duration::from_millis(2500))
        );
    }

    #[tokio::test]
    async fn test_tool_cost_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "default_unit_cost: 2\ntools:\n  send_reply: 5").unwrap();

        let provider = MemoryConfigProvider::new()
            .value("metering.tool_cost_path", file.path().to_string_lossy().to_string());
        let settings = EntitlementSettings::load(&provider).await.unwrap();
        assert_eq!(settings.costs.cost_for("send_reply"), 5);
        assert_eq!(settings.costs.cost_for("list_threads"), 2);
    }

    #[tokio::test]
    async fn test_collects_all_errors() {
        let provider = MemoryConfigProvider::new()
            .value("metering.default_unit_cost", "0")
            .value("observer.warn_utilization", "1.5")
            .value("reconcile.interval_secs", "often");

        let err = EntitlementSettings::load(&provider).await.unwrap_err();
        match err {
            ConfigError::ValidationErrors(ValidationErrors(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation errors, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_secret_is_redacted() {
        let provider = MemoryConfigProvider::new().value("database.url", "postgres://user:hunter2@db/gate");
        let settings = EntitlementSettings::load(&provider).await.unwrap();
        assert!(!format!("{:?}", settings).contains("hunter2"));
    }
}
