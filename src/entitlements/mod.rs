//! Admission control and metering for paid tool calls.
//!
//! [`EntitlementService`] wraps each gated call in two steps:
//!
//! 1. `pre_authorize_tool` rolls an expired usage period forward, checks the
//!    subscription state and the rate limiter, then atomically reserves the
//!    tool's unit cost against the tenant's monthly quota.
//! 2. `finalize_tool_execution` appends the usage event keyed by the replay
//!    id and, when the work failed, credits the reserved units back.

mod costs;
mod gate;
mod policy;
mod rollover;
mod service;

pub use costs::CostTable;
pub use gate::EntitlementGate;
pub use policy::{SubscriptionDenied, grace_until_for_status, validate_subscription_access};
pub use rollover::{default_period, rollover_window};
pub use service::{EntitlementService, SubscriptionUpdate, UsageSnapshot};

use std::time::Duration;

use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Error, Debug)]
pub enum EntitlementError {
    #[error("Subscription inactive: {reason}")]
    SubscriptionInactive { reason: String },

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Quota exceeded: monthly limit of {limit} units reached")]
    QuotaExceeded { limit: i64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl EntitlementError {
    pub fn subscription_inactive(reason: impl Into<String>) -> Self {
        Self::SubscriptionInactive {
            reason: reason.into(),
        }
    }

    /// Only a rate-limit denial clears by itself within a request's lifetime.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }

    pub fn is_denial(&self) -> bool {
        !matches!(self, Self::Ledger(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_semantics() {
        let limited = EntitlementError::RateLimited { retry_after_secs: 3 };
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));

        let quota = EntitlementError::QuotaExceeded { limit: 20 };
        assert!(!quota.is_retryable());
        assert!(quota.is_quota_exceeded());
        assert!(quota.retry_after().is_none());

        let storage = EntitlementError::from(LedgerError::Storage {
            message: "connection reset".into(),
        });
        assert!(!storage.is_denial());
        assert!(storage.to_string().contains("connection reset"));
    }
}
