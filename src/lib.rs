//! # entitlement-gate
//!
//! Subscription entitlements, rate limiting and metered quota for paid tool
//! calls in a multi-tenant server.
//!
//! Every gated call runs through two steps on an [`EntitlementService`]:
//! admission (`pre_authorize_tool`) reserves the tool's unit cost against the
//! tenant's monthly quota, and finalization (`finalize_tool_execution`)
//! records the usage event and credits the reservation back if the work
//! failed. A [`ReconcileService`] repairs counter drift and rolls idle
//! tenants into their current billing window.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use entitlement_gate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> entitlement_gate::Result<()> {
//!     let ledger = Arc::new(MemoryLedger::new());
//!     let service = EntitlementService::new(ledger);
//!
//!     let now = chrono::Utc::now();
//!     let update = SubscriptionUpdate::new(SubscriptionStatus::Active)
//!         .with_plan("pro", PlanLimits { rate_per_minute: 60, monthly_units: 1_000 })
//!         .with_period(now, now + chrono::Duration::days(30));
//!     service.sync_subscription("acme", update).await?;
//!
//!     let principal = Principal::tenant("acme");
//!     let replay = ReplayId::from_string("req-42");
//!     let reservation = service.pre_authorize_tool(&principal, "send_reply", &replay).await?;
//!
//!     // ... run the tool ...
//!
//!     service
//!         .finalize_tool_execution(&reservation, "send_reply", &replay, None, ExecutionStatus::Success)
//!         .await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod clock;
pub mod config;
pub mod entitlements;
pub mod ledger;
pub mod observability;
pub mod prelude;
pub mod rate_limit;
pub mod reconcile;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigBuilder, ConfigError, EntitlementSettings};
pub use entitlements::{
    CostTable, EntitlementError, EntitlementGate, EntitlementService, SubscriptionUpdate,
    UsageSnapshot,
};
#[cfg(feature = "postgres")]
pub use ledger::{PostgresConfig, PostgresLedger};
pub use ledger::{LedgerError, MemoryLedger, TenantLedger, UsageLedger};
pub use observability::{DenyReason, EntitlementMetrics, EntitlementObserver, ObserverConfig};
pub use rate_limit::{RateDecision, RateLimit, TokenBucketLimiter};
pub use reconcile::{ReconcileReport, ReconcileScheduler, ReconcileService};
pub use types::{
    Entitlement, ExecutionStatus, PlanLimits, Principal, RecordOutcome, ReplayId, Reservation,
    SubscriptionStatus, UsageCounter, UsageEvent,
};

/// Crate-level error for callers that mix gate, ledger and config failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Entitlement(#[from] EntitlementError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Subscription state or tenant identity denied the call
    Billing,
    /// Rate limit; retry after the hinted delay
    Transient,
    /// Monthly quota exhausted
    ResourceLimit,
    /// Invalid or missing configuration
    Configuration,
    /// Backing store failures
    Storage,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Entitlement(EntitlementError::RateLimited { .. }) => ErrorCategory::Transient,
            Error::Entitlement(EntitlementError::QuotaExceeded { .. }) => {
                ErrorCategory::ResourceLimit
            }
            Error::Entitlement(EntitlementError::SubscriptionInactive { .. }) => {
                ErrorCategory::Billing
            }
            Error::Entitlement(EntitlementError::Ledger(e)) | Error::Ledger(e) => match e {
                LedgerError::MissingTenant | LedgerError::TenantMismatch { .. } => {
                    ErrorCategory::Billing
                }
                LedgerError::NotFound { .. } | LedgerError::Storage { .. } => {
                    ErrorCategory::Storage
                }
            },
            Error::Config(_) => ErrorCategory::Configuration,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            Error::Entitlement(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Result type alias for entitlement-gate operations.
pub type Result<T> = std::result::Result<T, Error>;
