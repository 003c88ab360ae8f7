//! Usage counters, ledger events, and reservations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entitlement::SubscriptionStatus;
use super::ids::ReplayId;

/// Meter charged for MCP tool calls.
pub const METER_MCP_UNITS: &str = "mcp_units";

/// Cached aggregate of successful usage for one (tenant, meter, period).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub tenant_id: String,
    pub meter: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub used: i64,
}

/// Outcome of a gated tool execution as recorded in the ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Success,
    Failed,
}

impl ExecutionStatus {
    /// Anything other than `success` counts as a failure.
    pub fn normalize(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("success") {
            Self::Success
        } else {
            Self::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only ledger entry; the source of truth counters are rebuilt from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub tenant_id: String,
    pub meter: String,
    pub quantity: i64,
    pub tool_name: String,
    pub replay_id: Option<ReplayId>,
    pub audit_id: Option<String>,
    pub status: ExecutionStatus,
    pub occurred_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(
        tenant_id: impl Into<String>,
        meter: impl Into<String>,
        quantity: i64,
        tool_name: impl Into<String>,
        status: ExecutionStatus,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            meter: meter.into(),
            quantity,
            tool_name: tool_name.into(),
            replay_id: None,
            audit_id: None,
            status,
            occurred_at,
        }
    }

    /// Blank replay ids are stored as absent so they never collide.
    pub fn with_replay_id(mut self, replay_id: &ReplayId) -> Self {
        self.replay_id = (!replay_id.is_empty()).then(|| replay_id.clone());
        self
    }

    pub fn with_audit_id(mut self, audit_id: Option<&str>) -> Self {
        self.audit_id = audit_id
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        self
    }
}

/// Result of the conditional increment at the store boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReserveOutcome {
    pub reserved: bool,
    pub used_after: i64,
}

impl ReserveOutcome {
    pub fn reserved(used_after: i64) -> Self {
        Self {
            reserved: true,
            used_after,
        }
    }

    pub fn rejected() -> Self {
        Self {
            reserved: false,
            used_after: 0,
        }
    }
}

/// Whether a ledger append created a row or hit an existing replay id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    Duplicate,
}

/// Provisional debit made before gated work runs; lives for one call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub tenant_id: String,
    pub meter: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub quantity: i64,
    pub monthly_units: i64,
    pub used_after: i64,
    pub subscription: SubscriptionStatus,
}

impl Reservation {
    pub fn remaining(&self) -> i64 {
        (self.monthly_units - self.used_after).max(0)
    }

    pub fn utilization(&self) -> f64 {
        if self.monthly_units > 0 {
            self.used_after as f64 / self.monthly_units as f64
        } else {
            0.0
        }
    }
}
