//! Core types shared by the ledger, the entitlement service, and reconciliation.

mod entitlement;
mod ids;
mod principal;
mod usage;

pub use entitlement::{Entitlement, PlanLimits, SubscriptionStatus};
pub use ids::ReplayId;
pub use principal::Principal;
pub use usage::{
    ExecutionStatus, METER_MCP_UNITS, RecordOutcome, Reservation, ReserveOutcome, UsageCounter,
    UsageEvent,
};
