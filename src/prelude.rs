//! Prelude module for convenient imports.
//!
//! ```rust
//! use entitlement_gate::prelude::*;
//! ```

pub use crate::Error;
pub use crate::Result;

// Gate
pub use crate::entitlements::{
    CostTable, EntitlementError, EntitlementGate, EntitlementService, SubscriptionUpdate,
    UsageSnapshot,
};

// Ledger
pub use crate::ledger::{LedgerError, MemoryLedger, TenantLedger, UsageLedger};
#[cfg(feature = "postgres")]
pub use crate::ledger::PostgresLedger;

// Rate limiting
pub use crate::rate_limit::{RateLimit, TokenBucketLimiter};

// Reconciliation
pub use crate::reconcile::{ReconcileScheduler, ReconcileService};

// Observability
pub use crate::observability::{EntitlementObserver, ObserverConfig};

// Types
pub use crate::clock::{Clock, ManualClock};
pub use crate::types::{
    Entitlement, ExecutionStatus, PlanLimits, Principal, RecordOutcome, ReplayId, Reservation,
    SubscriptionStatus,
};
