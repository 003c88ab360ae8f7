//! Tenant entitlement rows and subscription states.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing state of a tenant's subscription.
///
/// Unrecognized provider states are preserved in [`SubscriptionStatus::Unknown`]
/// and always deny access.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Unknown(String),
}

impl SubscriptionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "trialing" => Self::Trialing,
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "unpaid" => Self::Unpaid,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Unknown(raw) => raw,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SubscriptionStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for SubscriptionStatus {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<SubscriptionStatus> for String {
    fn from(status: SubscriptionStatus) -> Self {
        status.as_str().to_string()
    }
}

/// A tenant's plan, limits, and current billing-period window.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub tenant_id: String,
    pub plan_code: String,
    pub subscription_status: SubscriptionStatus,
    /// Tool calls per minute admitted by the rate limiter.
    pub rate_per_minute: i64,
    /// Metered units available per usage period.
    pub monthly_units: i64,
    pub usage_period_start: DateTime<Utc>,
    pub usage_period_end: DateTime<Utc>,
    pub grace_until: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Entitlement {
    pub fn new(
        tenant_id: impl Into<String>,
        plan_code: impl Into<String>,
        usage_period_start: DateTime<Utc>,
        usage_period_end: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            plan_code: plan_code.into(),
            subscription_status: SubscriptionStatus::Active,
            rate_per_minute: 60,
            monthly_units: 0,
            usage_period_start,
            usage_period_end,
            grace_until: None,
            updated_at: usage_period_start,
        }
    }

    pub fn with_status(mut self, status: SubscriptionStatus) -> Self {
        self.subscription_status = status;
        self
    }

    pub fn with_rate_per_minute(mut self, rate_per_minute: i64) -> Self {
        self.rate_per_minute = rate_per_minute;
        self
    }

    pub fn with_monthly_units(mut self, monthly_units: i64) -> Self {
        self.monthly_units = monthly_units;
        self
    }

    pub fn with_grace_until(mut self, grace_until: DateTime<Utc>) -> Self {
        self.grace_until = Some(grace_until);
        self
    }

    pub fn is_period_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.usage_period_end
    }
}

/// Limits granted by a plan, applied to an entitlement on subscription sync.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub rate_per_minute: i64,
    pub monthly_units: i64,
}
