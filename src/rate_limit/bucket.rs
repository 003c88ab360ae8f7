//! Token bucket implementation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{FALLBACK_RETRY_SECS, RateDecision, RateLimit};
use crate::clock::{Clock, system_clock};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateBucket {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_per_sec: f64,
    pub last_refill: DateTime<Utc>,
}

impl RateBucket {
    fn fresh(capacity: f64, now: DateTime<Utc>) -> Self {
        Self {
            tokens: capacity - 1.0,
            capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_refill)
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
            .unwrap_or(f64::MAX);
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn rebase(&mut self, capacity: f64) {
        let refill_per_sec = capacity / 60.0;
        if self.capacity != capacity || self.refill_per_sec != refill_per_sec {
            self.capacity = capacity;
            self.refill_per_sec = refill_per_sec;
            self.tokens = self.tokens.min(capacity);
        }
    }

    fn take(&mut self) -> RateDecision {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return RateDecision::allow();
        }
        let deficit = 1.0 - self.tokens;
        // deficit / (capacity / 60) without the rounding of the stored rate.
        let retry = (deficit * 60.0 / self.capacity).ceil();
        RateDecision::deny(if retry.is_finite() { retry as u64 } else { FALLBACK_RETRY_SECS })
    }
}

/// In-process token bucket per tenant.
///
/// Capacity equals the tenant's requests-per-minute and refills continuously
/// at `rpm / 60` tokens per second. Each bucket lives in its own `DashMap`
/// entry, so updates for one tenant are serialized without blocking others.
#[derive(Clone)]
pub struct TokenBucketLimiter {
    buckets: Arc<DashMap<String, RateBucket>>,
    clock: Arc<dyn Clock>,
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("tenants", &self.buckets.len())
            .finish()
    }
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn bucket(&self, tenant_id: &str) -> Option<RateBucket> {
        self.buckets.get(tenant_id).map(|b| *b)
    }

    /// Drop a tenant's bucket; the next request starts from a full bucket.
    pub fn forget(&self, tenant_id: &str) -> bool {
        self.buckets.remove(tenant_id).is_some()
    }

    pub fn tracked_tenants(&self) -> usize {
        self.buckets.len()
    }
}

impl RateLimit for TokenBucketLimiter {
    fn allow(&self, tenant_id: &str, rate_per_minute: i64) -> RateDecision {
        if rate_per_minute <= 0 || tenant_id.is_empty() {
            return RateDecision::deny(FALLBACK_RETRY_SECS);
        }

        let now = self.clock.now();
        let capacity = rate_per_minute as f64;

        let mut entry = match self.buckets.entry(tenant_id.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(RateBucket::fresh(capacity, now));
                return RateDecision::allow();
            }
            Entry::Occupied(entry) => entry,
        };

        let bucket = entry.get_mut();
        bucket.refill(now);
        bucket.rebase(capacity);
        let decision = bucket.take();

        if !decision.allowed {
            tracing::debug!(
                tenant_id,
                rate_per_minute,
                retry_after_secs = decision.retry_after_secs,
                "Rate bucket empty"
            );
        }
        decision
    }
}
