//! Allow/deny telemetry with utilization and repeated-denial alerts.

use std::fmt;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use super::metrics::{EntitlementMetrics, MetricsSummary};
use crate::types::SubscriptionStatus;

/// Machine-readable cause attached to every denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    MissingTenant,
    MissingEntitlement,
    Subscription(SubscriptionStatus),
    RateLimited,
    QuotaExceeded,
    /// Gated work failed after admission and its units were credited back.
    ExecutionFailed,
}

impl DenyReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::MissingTenant => "missing_tenant",
            Self::MissingEntitlement => "missing_entitlement",
            Self::Subscription(_) => "subscription",
            Self::RateLimited => "rate_limited",
            Self::QuotaExceeded => "quota_exceeded",
            Self::ExecutionFailed => "tool_execution_failed",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscription(status) => write!(f, "subscription_{}", status.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverConfig {
    /// Utilization at which a tenant gets its one-time warning.
    pub warn_utilization: f64,
    /// Raise an alert on every Nth denial for a tenant.
    pub alert_every: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            warn_utilization: 0.8,
            alert_every: 10,
        }
    }
}

impl ObserverConfig {
    pub fn warn_utilization(mut self, threshold: f64) -> Self {
        self.warn_utilization = threshold;
        self
    }

    pub fn alert_every(mut self, n: u64) -> Self {
        self.alert_every = n.max(1);
        self
    }
}

#[derive(Debug, Default)]
pub struct EntitlementObserver {
    config: ObserverConfig,
    deny_counts: DashMap<String, u64>,
    warned: DashSet<String>,
    metrics: Arc<EntitlementMetrics>,
}

impl EntitlementObserver {
    pub fn new(config: ObserverConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<EntitlementMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &ObserverConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<EntitlementMetrics> {
        &self.metrics
    }

    pub fn snapshot(&self) -> MetricsSummary {
        self.metrics.snapshot()
    }

    pub fn deny_count(&self, tenant_id: &str) -> u64 {
        self.deny_counts.get(tenant_id).map(|c| *c).unwrap_or(0)
    }

    pub fn has_warned(&self, tenant_id: &str) -> bool {
        self.warned.contains(tenant_id)
    }

    /// Record an admitted call. Returns true when this call raised the
    /// tenant's one-time utilization warning.
    pub fn record_allow(&self, tenant_id: &str, reason: &str, used: i64, limit: i64) -> bool {
        self.metrics.allowed.inc();

        let utilization = if limit > 0 {
            used as f64 / limit as f64
        } else {
            0.0
        };
        tracing::info!(
            tenant_id,
            reason,
            used,
            limit,
            utilization,
            "Entitlement allow"
        );

        if utilization >= self.config.warn_utilization && self.warned.insert(tenant_id.to_string()) {
            tracing::warn!(
                tenant_id,
                threshold = self.config.warn_utilization,
                used,
                limit,
                "Tenant usage crossed warning threshold"
            );
            return true;
        }
        false
    }

    /// Record a denial. Returns the tenant's running deny count, or 0 for a
    /// call without a tenant, which only feeds the global counters.
    pub fn record_deny(&self, tenant_id: &str, reason: &DenyReason) -> u64 {
        match reason {
            DenyReason::RateLimited => self.metrics.rate_limited.inc(),
            DenyReason::QuotaExceeded => self.metrics.quota_exceeded.inc(),
            DenyReason::ExecutionFailed => self.metrics.failed_executions.inc(),
            DenyReason::MissingTenant
            | DenyReason::MissingEntitlement
            | DenyReason::Subscription(_) => self.metrics.subscription_denied.inc(),
        }
        self.metrics.denied.inc();

        if tenant_id.trim().is_empty() {
            tracing::info!(reason = %reason, "Entitlement deny without tenant");
            return 0;
        }

        let count = {
            let mut entry = self.deny_counts.entry(tenant_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        tracing::info!(tenant_id, reason = %reason, count, "Entitlement deny");

        if count % self.config.alert_every.max(1) == 0 {
            self.metrics.alerts.inc();
            tracing::warn!(
                tenant_id,
                reason = %reason,
                repeated_deny_count = count,
                "Repeated entitlement denials"
            );
        }
        count
    }

    /// Clear a tenant's latch and deny count. Called once a rolled-over
    /// period has been committed.
    pub fn reset_tenant(&self, tenant_id: &str) {
        self.deny_counts.remove(tenant_id);
        self.warned.remove(tenant_id);
    }
}
