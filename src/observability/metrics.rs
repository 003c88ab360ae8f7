//! In-process admission counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Thread-safe atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Admission outcomes since process start.
#[derive(Debug, Default)]
pub struct EntitlementMetrics {
    pub allowed: Counter,
    pub denied: Counter,
    pub rate_limited: Counter,
    pub quota_exceeded: Counter,
    pub subscription_denied: Counter,
    pub failed_executions: Counter,
    pub alerts: Counter,
}

impl EntitlementMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSummary {
        MetricsSummary::from_metrics(self)
    }
}

/// Point-in-time copy of [`EntitlementMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSummary {
    pub allowed: u64,
    pub denied: u64,
    pub rate_limited: u64,
    pub quota_exceeded: u64,
    pub subscription_denied: u64,
    pub failed_executions: u64,
    pub alerts: u64,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &EntitlementMetrics) -> Self {
        Self {
            allowed: metrics.allowed.get(),
            denied: metrics.denied.get(),
            rate_limited: metrics.rate_limited.get(),
            quota_exceeded: metrics.quota_exceeded.get(),
            subscription_denied: metrics.subscription_denied.get(),
            failed_executions: metrics.failed_executions.get(),
            alerts: metrics.alerts.get(),
        }
    }

    /// Share of admission decisions that were allowed.
    pub fn allow_ratio(&self) -> f64 {
        let total = self.allowed + self.denied;
        if total == 0 {
            0.0
        } else {
            self.allowed as f64 / total as f64
        }
    }
}
