//! In-memory ledger backend.
//!
//! All state sits behind one mutex, so the conditional increment in
//! `reserve_units` is a single critical section. Tenant scopes keep an undo
//! log and roll their writes back when dropped without a commit.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::store::{TenantLedger, UsageLedger};
use super::{LedgerError, LedgerResult, ensure_tenant};
use crate::types::{Entitlement, RecordOutcome, ReserveOutcome, UsageCounter, UsageEvent};

type CounterKey = (String, String, DateTime<Utc>);

fn counter_key(tenant_id: &str, meter: &str, period_start: DateTime<Utc>) -> CounterKey {
    (tenant_id.to_string(), meter.to_string(), period_start)
}

#[derive(Debug, Default)]
struct LedgerState {
    entitlements: HashMap<String, Entitlement>,
    counters: HashMap<CounterKey, UsageCounter>,
    events: Vec<UsageEvent>,
    replay_ids: HashSet<String>,
}

impl LedgerState {
    /// Returns the previous bounds when the entitlement exists.
    fn set_period(
        &mut self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let ent = self.entitlements.get_mut(tenant_id)?;
        let previous = (ent.usage_period_start, ent.usage_period_end);
        ent.usage_period_start = period_start;
        ent.usage_period_end = period_end;
        Some(previous)
    }

    /// Counter rows survive a rolled-back scope; another scope may already be
    /// reserving against them.
    fn ensure_counter(
        &mut self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) {
        let key = counter_key(tenant_id, meter, period_start);
        self.counters
            .entry(key)
            .and_modify(|counter| counter.period_end = period_end)
            .or_insert_with(|| UsageCounter {
                tenant_id: tenant_id.to_string(),
                meter: meter.to_string(),
                period_start,
                period_end,
                used: 0,
            });
    }

    fn reserve(&mut self, key: &CounterKey, cost: i64, limit: i64) -> ReserveOutcome {
        match self.counters.get_mut(key) {
            Some(counter) if counter.used.checked_add(cost).is_some_and(|n| n <= limit) => {
                counter.used += cost;
                ReserveOutcome::reserved(counter.used)
            }
            _ => ReserveOutcome::rejected(),
        }
    }

    /// Returns the amount actually subtracted.
    fn release(&mut self, key: &CounterKey, quantity: i64) -> i64 {
        match self.counters.get_mut(key) {
            Some(counter) => {
                let released = quantity.clamp(0, counter.used.max(0));
                counter.used -= released;
                released
            }
            None => 0,
        }
    }

    fn record(&mut self, event: &UsageEvent) -> RecordOutcome {
        if let Some(replay) = &event.replay_id
            && !self.replay_ids.insert(replay.as_str().to_string())
        {
            return RecordOutcome::Duplicate;
        }
        self.events.push(event.clone());
        RecordOutcome::Inserted
    }

    fn sum(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> i64 {
        self.events
            .iter()
            .filter(|e| {
                e.tenant_id == tenant_id
                    && e.meter == meter
                    && e.status.is_success()
                    && e.occurred_at >= period_start
                    && e.occurred_at < period_end
            })
            .map(|e| e.quantity)
            .sum()
    }
}

/// In-memory ledger (single-instance deployments and tests).
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace a counter row verbatim, including its `used` value.
    pub fn put_counter(&self, counter: UsageCounter) {
        let key = counter_key(&counter.tenant_id, &counter.meter, counter.period_start);
        self.lock().counters.insert(key, counter);
    }

    /// Append an event outside any tenant scope (seeding and repair tooling).
    pub fn put_event(&self, event: UsageEvent) -> RecordOutcome {
        self.lock().record(&event)
    }

    pub fn events(&self, tenant_id: &str) -> Vec<UsageEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    pub fn counter(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
    ) -> Option<UsageCounter> {
        self.lock()
            .counters
            .get(&counter_key(tenant_id, meter, period_start))
            .cloned()
    }
}

#[async_trait]
impl UsageLedger for MemoryLedger {
    fn name(&self) -> &str {
        "memory"
    }

    async fn begin(&self, tenant_id: &str) -> LedgerResult<Box<dyn TenantLedger>> {
        if tenant_id.trim().is_empty() {
            return Err(LedgerError::MissingTenant);
        }
        Ok(Box::new(MemoryTenantLedger {
            state: Arc::clone(&self.state),
            tenant_id: tenant_id.to_string(),
            undo: Vec::new(),
            committed: false,
        }))
    }

    async fn get_entitlement(&self, tenant_id: &str) -> LedgerResult<Option<Entitlement>> {
        Ok(self.lock().entitlements.get(tenant_id).cloned())
    }

    async fn upsert_entitlement(&self, entitlement: &Entitlement) -> LedgerResult<()> {
        self.lock()
            .entitlements
            .insert(entitlement.tenant_id.clone(), entitlement.clone());
        Ok(())
    }

    async fn update_usage_period(
        &self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.lock().set_period(tenant_id, period_start, period_end);
        Ok(())
    }

    async fn ensure_usage_counter(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()> {
        self.lock()
            .ensure_counter(tenant_id, meter, period_start, period_end);
        Ok(())
    }

    async fn get_usage_counter_used(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        self.lock()
            .counters
            .get(&counter_key(tenant_id, meter, period_start))
            .map(|c| c.used)
            .ok_or_else(|| {
                LedgerError::not_found(format!(
                    "usage counter {}/{}@{}",
                    tenant_id, meter, period_start
                ))
            })
    }

    async fn set_usage_counter_used(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        used: i64,
    ) -> LedgerResult<()> {
        if let Some(counter) = self
            .lock()
            .counters
            .get_mut(&counter_key(tenant_id, meter, period_start))
        {
            counter.used = used;
        }
        Ok(())
    }

    async fn list_usage_counters(&self) -> LedgerResult<Vec<UsageCounter>> {
        Ok(self.lock().counters.values().cloned().collect())
    }

    async fn sum_usage_events(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        Ok(self.lock().sum(tenant_id, meter, period_start, period_end))
    }

    async fn list_expired_entitlements(&self, now: DateTime<Utc>) -> LedgerResult<Vec<Entitlement>> {
        Ok(self
            .lock()
            .entitlements
            .values()
            .filter(|e| e.usage_period_end < now)
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
enum Undo {
    Entitlement {
        tenant_id: String,
        previous: Option<Entitlement>,
    },
    Period {
        tenant_id: String,
        previous: (DateTime<Utc>, DateTime<Utc>),
        applied: (DateTime<Utc>, DateTime<Utc>),
    },
    Reserved(CounterKey, i64),
    Released(CounterKey, i64),
    Event {
        id: Uuid,
        replay_id: Option<String>,
    },
}

/// Tenant scope over a [`MemoryLedger`].
#[derive(Debug)]
pub struct MemoryTenantLedger {
    state: Arc<Mutex<LedgerState>>,
    tenant_id: String,
    undo: Vec<Undo>,
    committed: bool,
}

impl MemoryTenantLedger {
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rollback(&mut self) {
        let undo = std::mem::take(&mut self.undo);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for step in undo.into_iter().rev() {
            match step {
                Undo::Entitlement {
                    tenant_id,
                    previous,
                } => match previous {
                    Some(ent) => {
                        state.entitlements.insert(tenant_id, ent);
                    }
                    None => {
                        state.entitlements.remove(&tenant_id);
                    }
                },
                Undo::Period {
                    tenant_id,
                    previous,
                    applied,
                } => {
                    // A concurrent scope may have moved the window since; leave it.
                    if let Some(ent) = state.entitlements.get_mut(&tenant_id)
                        && (ent.usage_period_start, ent.usage_period_end) == applied
                    {
                        ent.usage_period_start = previous.0;
                        ent.usage_period_end = previous.1;
                    }
                }
                Undo::Reserved(key, cost) => {
                    state.release(&key, cost);
                }
                Undo::Released(key, released) => {
                    if let Some(counter) = state.counters.get_mut(&key) {
                        counter.used += released;
                    }
                }
                Undo::Event { id, replay_id } => {
                    state.events.retain(|e| e.id != id);
                    if let Some(replay) = replay_id {
                        state.replay_ids.remove(&replay);
                    }
                }
            }
        }
        tracing::debug!(tenant_id = %self.tenant_id, "Rolled back uncommitted ledger scope");
    }
}

impl Drop for MemoryTenantLedger {
    fn drop(&mut self) {
        if !self.committed && !self.undo.is_empty() {
            self.rollback();
        }
    }
}

#[async_trait]
impl TenantLedger for MemoryTenantLedger {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    async fn get_entitlement(&mut self, tenant_id: &str) -> LedgerResult<Option<Entitlement>> {
        ensure_tenant(&self.tenant_id, tenant_id)?;
        Ok(self.lock().entitlements.get(tenant_id).cloned())
    }

    async fn upsert_entitlement(&mut self, entitlement: &Entitlement) -> LedgerResult<()> {
        ensure_tenant(&self.tenant_id, &entitlement.tenant_id)?;
        let previous = self
            .lock()
            .entitlements
            .insert(entitlement.tenant_id.clone(), entitlement.clone());
        self.undo.push(Undo::Entitlement {
            tenant_id: entitlement.tenant_id.clone(),
            previous,
        });
        Ok(())
    }

    async fn update_usage_period(
        &mut self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()> {
        ensure_tenant(&self.tenant_id, tenant_id)?;
        let previous = self.lock().set_period(tenant_id, period_start, period_end);
        if let Some(previous) = previous {
            self.undo.push(Undo::Period {
                tenant_id: tenant_id.to_string(),
                previous,
                applied: (period_start, period_end),
            });
        }
        Ok(())
    }

    async fn ensure_usage_counter(
        &mut self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()> {
        ensure_tenant(&self.tenant_id, tenant_id)?;
        self.lock()
            .ensure_counter(tenant_id, meter, period_start, period_end);
        Ok(())
    }

    async fn reserve_units(
        &mut self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        cost: i64,
        limit: i64,
    ) -> LedgerResult<ReserveOutcome> {
        ensure_tenant(&self.tenant_id, tenant_id)?;
        let key = counter_key(tenant_id, meter, period_start);
        let outcome = self.lock().reserve(&key, cost, limit);
        if outcome.reserved {
            self.undo.push(Undo::Reserved(key, cost));
        }
        Ok(outcome)
    }

    async fn release_units(
        &mut self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        quantity: i64,
    ) -> LedgerResult<()> {
        ensure_tenant(&self.tenant_id, tenant_id)?;
        let key = counter_key(tenant_id, meter, period_start);
        let released = self.lock().release(&key, quantity);
        if released > 0 {
            self.undo.push(Undo::Released(key, released));
        }
        Ok(())
    }

    async fn record_usage_event(&mut self, event: &UsageEvent) -> LedgerResult<RecordOutcome> {
        ensure_tenant(&self.tenant_id, &event.tenant_id)?;
        let outcome = self.lock().record(event);
        if outcome == RecordOutcome::Inserted {
            self.undo.push(Undo::Event {
                id: event.id,
                replay_id: event.replay_id.as_ref().map(|r| r.as_str().to_string()),
            });
        }
        Ok(outcome)
    }

    async fn commit(mut self: Box<Self>) -> LedgerResult<()> {
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionStatus, METER_MCP_UNITS, ReplayId};
    use chrono::{TimeDelta, TimeZone};

    fn period() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        (start, start + TimeDelta::days(30))
    }

    #[tokio::test]
    async fn test_reserve_respects_limit() {
        let ledger = MemoryLedger::new();
        let (start, end) = period();
        let mut scope = ledger.begin("tenant-a").await.unwrap();
        scope
            .ensure_usage_counter("tenant-a", METER_MCP_UNITS, start, end)
            .await
            .unwrap();

        let first = scope
            .reserve_units("tenant-a", METER_MCP_UNITS, start, 3, 5)
            .await
            .unwrap();
        assert_eq!(first, ReserveOutcome::reserved(3));

        let second = scope
            .reserve_units("tenant-a", METER_MCP_UNITS, start, 3, 5)
            .await
            .unwrap();
        assert!(!second.reserved);
        scope.commit().await.unwrap();

        let used = ledger
            .get_usage_counter_used("tenant-a", METER_MCP_UNITS, start)
            .await
            .unwrap();
        assert_eq!(used, 3);
    }

    #[tokio::test]
    async fn test_reserve_without_counter_is_rejected() {
        let ledger = MemoryLedger::new();
        let (start, _) = period();
        let mut scope = ledger.begin("tenant-a").await.unwrap();
        let outcome = scope
            .reserve_units("tenant-a", METER_MCP_UNITS, start, 1, 100)
            .await
            .unwrap();
        assert!(!outcome.reserved);
    }

    #[tokio::test]
    async fn test_release_floors_at_zero() {
        let ledger = MemoryLedger::new();
        let (start, end) = period();
        ledger.put_counter(UsageCounter {
            tenant_id: "tenant-a".into(),
            meter: METER_MCP_UNITS.into(),
            period_start: start,
            period_end: end,
            used: 2,
        });

        let mut scope = ledger.begin("tenant-a").await.unwrap();
        scope
            .release_units("tenant-a", METER_MCP_UNITS, start, 5)
            .await
            .unwrap();
        scope.commit().await.unwrap();

        assert_eq!(ledger.counter("tenant-a", METER_MCP_UNITS, start).unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_scope_rejects_foreign_tenant() {
        let ledger = MemoryLedger::new();
        let (start, end) = period();
        let mut scope = ledger.begin("tenant-a").await.unwrap();

        let err = scope
            .ensure_usage_counter("tenant-b", METER_MCP_UNITS, start, end)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TenantMismatch { .. }));
        assert!(ledger.counter("tenant-b", METER_MCP_UNITS, start).is_none());
    }

    #[tokio::test]
    async fn test_begin_requires_tenant() {
        let ledger = MemoryLedger::new();
        assert!(matches!(
            ledger.begin("  ").await.err(),
            Some(LedgerError::MissingTenant)
        ));
    }

    #[tokio::test]
    async fn test_dropped_scope_rolls_back() {
        let ledger = MemoryLedger::new();
        let (start, end) = period();
        ledger
            .upsert_entitlement(&Entitlement::new("tenant-a", "pro", start, end).with_monthly_units(10))
            .await
            .unwrap();

        {
            let mut scope = ledger.begin("tenant-a").await.unwrap();
            scope
                .update_usage_period("tenant-a", end, end + TimeDelta::days(30))
                .await
                .unwrap();
            scope
                .ensure_usage_counter("tenant-a", METER_MCP_UNITS, end, end + TimeDelta::days(30))
                .await
                .unwrap();
            scope
                .reserve_units("tenant-a", METER_MCP_UNITS, end, 1, 10)
                .await
                .unwrap();
        }

        let ent = ledger.get_entitlement("tenant-a").await.unwrap().unwrap();
        assert_eq!(ent.usage_period_start, start);
        assert_eq!(ledger.counter("tenant-a", METER_MCP_UNITS, end).unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_dropped_scope_keeps_counter_shared_with_live_scope() {
        let ledger = MemoryLedger::new();
        let (start, end) = period();

        let mut first = ledger.begin("tenant-a").await.unwrap();
        let mut second = ledger.begin("tenant-a").await.unwrap();
        first
            .ensure_usage_counter("tenant-a", METER_MCP_UNITS, start, end)
            .await
            .unwrap();
        second
            .ensure_usage_counter("tenant-a", METER_MCP_UNITS, start, end)
            .await
            .unwrap();

        let oversized = first
            .reserve_units("tenant-a", METER_MCP_UNITS, start, 5, 3)
            .await
            .unwrap();
        assert!(!oversized.reserved);
        drop(first);

        let outcome = second
            .reserve_units("tenant-a", METER_MCP_UNITS, start, 1, 3)
            .await
            .unwrap();
        assert_eq!(outcome, ReserveOutcome::reserved(1));
        second.commit().await.unwrap();

        assert_eq!(ledger.counter("tenant-a", METER_MCP_UNITS, start).unwrap().used, 1);
    }

    #[tokio::test]
    async fn test_reserve_rejects_cost_that_would_overflow() {
        let ledger = MemoryLedger::new();
        let (start, end) = period();
        ledger.put_counter(UsageCounter {
            tenant_id: "tenant-a".into(),
            meter: METER_MCP_UNITS.into(),
            period_start: start,
            period_end: end,
            used: 1,
        });

        let mut scope = ledger.begin("tenant-a").await.unwrap();
        let outcome = scope
            .reserve_units("tenant-a", METER_MCP_UNITS, start, i64::MAX, i64::MAX)
            .await
            .unwrap();
        assert!(!outcome.reserved);
        scope.commit().await.unwrap();

        assert_eq!(ledger.counter("tenant-a", METER_MCP_UNITS, start).unwrap().used, 1);
    }

    #[tokio::test]
    async fn test_duplicate_replay_id() {
        let ledger = MemoryLedger::new();
        let (start, _) = period();
        let replay = ReplayId::from("replay-1");
        let event = UsageEvent::new(
            "tenant-a",
            METER_MCP_UNITS,
            1,
            "list_threads",
            ExecutionStatus::Success,
            start,
        )
        .with_replay_id(&replay);

        let mut scope = ledger.begin("tenant-a").await.unwrap();
        assert_eq!(
            scope.record_usage_event(&event).await.unwrap(),
            RecordOutcome::Inserted
        );
        let mut again = event.clone();
        again.id = Uuid::new_v4();
        assert_eq!(
            scope.record_usage_event(&again).await.unwrap(),
            RecordOutcome::Duplicate
        );
        scope.commit().await.unwrap();

        assert_eq!(ledger.events("tenant-a").len(), 1);
    }

    #[tokio::test]
    async fn test_sum_counts_only_successes_in_window() {
        let ledger = MemoryLedger::new();
        let (start, end) = period();
        let at = start + TimeDelta::days(1);
        for (qty, status, when) in [
            (3, ExecutionStatus::Success, at),
            (1, ExecutionStatus::Success, at),
            (9, ExecutionStatus::Failed, at),
            (7, ExecutionStatus::Success, end),
        ] {
            ledger.put_event(UsageEvent::new("tenant-a", METER_MCP_UNITS, qty, "tool", status, when));
        }

        let total = ledger
            .sum_usage_events("tenant-a", METER_MCP_UNITS, start, end)
            .await
            .unwrap();
        assert_eq!(total, 4);
    }
}
