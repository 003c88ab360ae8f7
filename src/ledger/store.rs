//! Ledger traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::LedgerResult;
use crate::types::{Entitlement, RecordOutcome, ReserveOutcome, UsageCounter, UsageEvent};

/// Store-wide ledger operations.
///
/// Unscoped reads and writes are used by the reconciliation sweep, which
/// works across tenants; the request path goes through [`UsageLedger::begin`].
#[async_trait]
pub trait UsageLedger: Send + Sync {
    fn name(&self) -> &str;

    /// Open a transaction whose every operation is confined to `tenant_id`.
    async fn begin(&self, tenant_id: &str) -> LedgerResult<Box<dyn TenantLedger>>;

    async fn get_entitlement(&self, tenant_id: &str) -> LedgerResult<Option<Entitlement>>;

    async fn upsert_entitlement(&self, entitlement: &Entitlement) -> LedgerResult<()>;

    async fn update_usage_period(
        &self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()>;

    async fn ensure_usage_counter(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()>;

    /// Fails with `NotFound` when no counter exists for the period.
    async fn get_usage_counter_used(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
    ) -> LedgerResult<i64>;

    async fn set_usage_counter_used(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        used: i64,
    ) -> LedgerResult<()>;

    async fn list_usage_counters(&self) -> LedgerResult<Vec<UsageCounter>>;

    /// Sum of successful event quantities with `period_start <= occurred_at < period_end`.
    async fn sum_usage_events(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<i64>;

    /// Entitlements whose `usage_period_end` is strictly before `now`.
    async fn list_expired_entitlements(&self, now: DateTime<Utc>) -> LedgerResult<Vec<Entitlement>>;
}

/// Tenant-scoped transaction.
///
/// Every call repeats the tenant id and the scope rejects a mismatch, so a
/// confused caller cannot touch another tenant's rows. Dropping the scope
/// without [`TenantLedger::commit`] discards its writes.
#[async_trait]
pub trait TenantLedger: Send {
    fn tenant_id(&self) -> &str;

    async fn get_entitlement(&mut self, tenant_id: &str) -> LedgerResult<Option<Entitlement>>;

    async fn upsert_entitlement(&mut self, entitlement: &Entitlement) -> LedgerResult<()>;

    async fn update_usage_period(
        &mut self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()>;

    async fn ensure_usage_counter(
        &mut self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()>;

    /// Atomically add `cost` to the counter only if `used + cost <= limit`.
    ///
    /// Implementations must evaluate the condition and the increment as one
    /// indivisible step against the shared store.
    async fn reserve_units(
        &mut self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        cost: i64,
        limit: i64,
    ) -> LedgerResult<ReserveOutcome>;

    /// Subtract `quantity` from the counter, flooring at zero.
    async fn release_units(
        &mut self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        quantity: i64,
    ) -> LedgerResult<()>;

    /// Append an event; a repeated non-empty replay id is reported as a duplicate.
    async fn record_usage_event(&mut self, event: &UsageEvent) -> LedgerResult<RecordOutcome>;

    async fn commit(self: Box<Self>) -> LedgerResult<()>;
}
