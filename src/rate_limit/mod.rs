//! Per-tenant request throttling.
//!
//! The limiter is soft: it smooths bursts within one process. The hard monthly
//! ceiling is enforced by the ledger's conditional reservation, so replicas
//! that each run their own limiter never overshoot a quota, they only throttle
//! independently.

mod bucket;

pub use bucket::{RateBucket, TokenBucketLimiter};

/// Retry hint returned when no usable rate is configured.
pub const FALLBACK_RETRY_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

impl RateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    pub fn deny(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: retry_after_secs.max(1),
        }
    }
}

/// Admission seam consulted on every pre-authorization.
pub trait RateLimit: Send + Sync {
    fn allow(&self, tenant_id: &str, rate_per_minute: i64) -> RateDecision;
}

/// Limiter that admits everything; for tests that exercise quota paths only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl RateLimit for Unlimited {
    fn allow(&self, _tenant_id: &str, _rate_per_minute: i64) -> RateDecision {
        RateDecision::allow()
    }
}
