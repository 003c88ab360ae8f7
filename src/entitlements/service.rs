//! Entitlement service: pre-authorization, finalization, and subscription sync.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::costs::CostTable;
use super::policy::{grace_until_for_status, validate_subscription_access};
use super::rollover::rollover_window;
use super::EntitlementError;
use crate::clock::{Clock, system_clock};
use crate::config::{DEFAULT_PAST_DUE_GRACE_DAYS, EntitlementSettings};
use crate::ledger::{LedgerError, UsageLedger};
use crate::observability::{DenyReason, EntitlementObserver};
use crate::rate_limit::{RateLimit, TokenBucketLimiter};
use crate::types::{
    Entitlement, ExecutionStatus, METER_MCP_UNITS, PlanLimits, Principal, RecordOutcome,
    ReplayId, Reservation, SubscriptionStatus, UsageEvent,
};

/// Billing state change applied by [`EntitlementService::sync_subscription`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionUpdate {
    pub status: SubscriptionStatus,
    pub plan_code: Option<String>,
    pub limits: Option<PlanLimits>,
    pub period: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl SubscriptionUpdate {
    pub fn new(status: impl Into<SubscriptionStatus>) -> Self {
        Self {
            status: status.into(),
            plan_code: None,
            limits: None,
            period: None,
        }
    }

    pub fn with_plan(mut self, plan_code: impl Into<String>, limits: PlanLimits) -> Self {
        self.plan_code = Some(plan_code.into());
        self.limits = Some(limits);
        self
    }

    pub fn with_period(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.period = Some((start, end));
        self
    }
}

/// Read-only view of a tenant's current period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub tenant_id: String,
    pub plan_code: String,
    pub status: SubscriptionStatus,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub used: i64,
    pub monthly_units: i64,
    pub remaining: i64,
}

pub struct EntitlementService {
    ledger: Arc<dyn UsageLedger>,
    limiter: Arc<dyn RateLimit>,
    observer: Arc<EntitlementObserver>,
    clock: Arc<dyn Clock>,
    costs: CostTable,
    meter: String,
    past_due_grace_days: i64,
}

impl std::fmt::Debug for EntitlementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementService")
            .field("ledger", &self.ledger.name())
            .field("meter", &self.meter)
            .field("costs", &self.costs)
            .field("past_due_grace_days", &self.past_due_grace_days)
            .finish_non_exhaustive()
    }
}

impl EntitlementService {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self {
            ledger,
            limiter: Arc::new(TokenBucketLimiter::new()),
            observer: Arc::new(EntitlementObserver::default()),
            clock: system_clock(),
            costs: CostTable::default(),
            meter: METER_MCP_UNITS.to_string(),
            past_due_grace_days: DEFAULT_PAST_DUE_GRACE_DAYS,
        }
    }

    pub fn from_settings(ledger: Arc<dyn UsageLedger>, settings: &EntitlementSettings) -> Self {
        Self::new(ledger)
            .with_costs(settings.costs.clone())
            .with_meter(settings.meter.clone())
            .with_past_due_grace_days(settings.past_due_grace_days)
            .with_observer(Arc::new(EntitlementObserver::new(settings.observer)))
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimit>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_observer(mut self, observer: Arc<EntitlementObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_costs(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }

    pub fn with_meter(mut self, meter: impl Into<String>) -> Self {
        self.meter = meter.into();
        self
    }

    pub fn with_past_due_grace_days(mut self, days: i64) -> Self {
        self.past_due_grace_days = days;
        self
    }

    pub fn observer(&self) -> &Arc<EntitlementObserver> {
        &self.observer
    }

    pub fn costs(&self) -> &CostTable {
        &self.costs
    }

    pub fn meter(&self) -> &str {
        &self.meter
    }

    fn deny(&self, tenant_id: &str, reason: DenyReason) -> String {
        self.observer.record_deny(tenant_id, &reason);
        reason.to_string()
    }

    /// Admit one call of `tool_name` for the principal's tenant and reserve its cost.
    ///
    /// Runs inside a single tenant scope. Any denial or error drops the scope
    /// uncommitted, which also discards a rollover made earlier in the call.
    #[tracing::instrument(
        skip_all,
        fields(tenant_id = %principal.tenant_id, tool = tool_name, replay_id = %replay_id)
    )]
    pub async fn pre_authorize_tool(
        &self,
        principal: &Principal,
        tool_name: &str,
        replay_id: &ReplayId,
    ) -> Result<Reservation, EntitlementError> {
        let tenant_id = principal.tenant_id.as_str();
        if !principal.has_tenant() {
            let reason = self.deny(tenant_id, DenyReason::MissingTenant);
            return Err(EntitlementError::subscription_inactive(reason));
        }

        let cost = self.costs.cost_for(tool_name);
        let now = self.clock.now();
        let mut scope = self.ledger.begin(tenant_id).await?;

        let Some(mut ent) = scope.get_entitlement(tenant_id).await? else {
            let reason = self.deny(tenant_id, DenyReason::MissingEntitlement);
            return Err(EntitlementError::subscription_inactive(reason));
        };

        let rolled = ent.is_period_expired(now);
        if rolled {
            let (start, end) = rollover_window(ent.usage_period_start, ent.usage_period_end, now);
            scope.update_usage_period(tenant_id, start, end).await?;
            tracing::info!(
                previous_start = %ent.usage_period_start,
                period_start = %start,
                period_end = %end,
                "Rolled usage period forward"
            );
            ent.usage_period_start = start;
            ent.usage_period_end = end;
        }

        if let Err(denied) = validate_subscription_access(now, &ent) {
            let reason = self.deny(tenant_id, DenyReason::Subscription(denied.status));
            return Err(EntitlementError::subscription_inactive(reason));
        }

        let decision = self.limiter.allow(tenant_id, ent.rate_per_minute);
        if !decision.allowed {
            self.deny(tenant_id, DenyReason::RateLimited);
            return Err(EntitlementError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        scope
            .ensure_usage_counter(tenant_id, &self.meter, ent.usage_period_start, ent.usage_period_end)
            .await?;
        let outcome = scope
            .reserve_units(tenant_id, &self.meter, ent.usage_period_start, cost, ent.monthly_units)
            .await?;
        if !outcome.reserved {
            self.deny(tenant_id, DenyReason::QuotaExceeded);
            return Err(EntitlementError::QuotaExceeded {
                limit: ent.monthly_units,
            });
        }

        scope.commit().await?;
        if rolled {
            self.observer.reset_tenant(tenant_id);
        }
        self.observer
            .record_allow(tenant_id, "authorized", outcome.used_after, ent.monthly_units);

        Ok(Reservation {
            tenant_id: tenant_id.to_string(),
            meter: self.meter.clone(),
            period_start: ent.usage_period_start,
            period_end: ent.usage_period_end,
            quantity: cost,
            monthly_units: ent.monthly_units,
            used_after: outcome.used_after,
            subscription: ent.subscription_status,
        })
    }

    /// Record the outcome of a gated call and credit back units on failure.
    ///
    /// A replay id that was already recorded makes the whole call a no-op, so
    /// re-delivering a failed finalize never releases the units twice.
    #[tracing::instrument(
        skip_all,
        fields(tenant_id = %reservation.tenant_id, tool = tool_name, status = %status)
    )]
    pub async fn finalize_tool_execution(
        &self,
        reservation: &Reservation,
        tool_name: &str,
        replay_id: &ReplayId,
        audit_id: Option<&str>,
        status: ExecutionStatus,
    ) -> Result<RecordOutcome, EntitlementError> {
        let tenant_id = reservation.tenant_id.as_str();
        let mut scope = self.ledger.begin(tenant_id).await?;

        let event = UsageEvent::new(
            tenant_id,
            &reservation.meter,
            reservation.quantity,
            tool_name,
            status,
            self.clock.now(),
        )
        .with_replay_id(replay_id)
        .with_audit_id(audit_id);

        if scope.record_usage_event(&event).await? == RecordOutcome::Duplicate {
            tracing::debug!(replay_id = %replay_id, "Replay already finalized");
            return Ok(RecordOutcome::Duplicate);
        }

        if !status.is_success() {
            scope
                .release_units(
                    tenant_id,
                    &reservation.meter,
                    reservation.period_start,
                    reservation.quantity,
                )
                .await?;
        }
        scope.commit().await?;

        if !status.is_success() {
            self.observer.record_deny(tenant_id, &DenyReason::ExecutionFailed);
        }
        Ok(RecordOutcome::Inserted)
    }

    /// Apply a billing status change to a tenant's entitlement.
    ///
    /// Creates the entitlement when absent, which requires both a plan and a
    /// period on the update. `grace_until` is recomputed from the resulting
    /// period end. A new period also gets its usage counter created.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, status = %update.status))]
    pub async fn sync_subscription(
        &self,
        tenant_id: &str,
        update: SubscriptionUpdate,
    ) -> Result<Entitlement, EntitlementError> {
        let SubscriptionUpdate {
            status,
            plan_code,
            limits,
            period,
        } = update;

        let mut scope = self.ledger.begin(tenant_id).await?;
        let mut ent = match scope.get_entitlement(tenant_id).await? {
            Some(ent) => ent,
            None => match (&plan_code, period) {
                (Some(plan), Some((start, end))) => Entitlement::new(tenant_id, plan.clone(), start, end),
                _ => {
                    return Err(LedgerError::not_found(format!("entitlement {}", tenant_id)).into());
                }
            },
        };

        if let Some(plan) = plan_code {
            ent.plan_code = plan;
        }
        if let Some(limits) = limits {
            ent.rate_per_minute = limits.rate_per_minute;
            ent.monthly_units = limits.monthly_units;
        }
        if let Some((start, end)) = period {
            ent.usage_period_start = start;
            ent.usage_period_end = end;
        }
        ent.subscription_status = status;
        ent.grace_until = grace_until_for_status(
            &ent.subscription_status,
            ent.usage_period_end,
            self.past_due_grace_days,
        );
        ent.updated_at = self.clock.now();

        scope.upsert_entitlement(&ent).await?;
        if period.is_some() {
            scope
                .ensure_usage_counter(tenant_id, &self.meter, ent.usage_period_start, ent.usage_period_end)
                .await?;
        }
        scope.commit().await?;

        tracing::info!(
            plan_code = %ent.plan_code,
            grace_until = ?ent.grace_until,
            "Synced subscription state"
        );
        Ok(ent)
    }

    /// Current-period usage without mutating anything.
    ///
    /// An expired window is reported as the period the next call would roll
    /// into, with whatever usage already exists there.
    pub async fn usage_snapshot(&self, tenant_id: &str) -> Result<UsageSnapshot, EntitlementError> {
        let ent = self
            .ledger
            .get_entitlement(tenant_id)
            .await?
            .ok_or_else(|| LedgerError::not_found(format!("entitlement {}", tenant_id)))?;

        let (period_start, period_end) =
            rollover_window(ent.usage_period_start, ent.usage_period_end, self.clock.now());

        let used = match self
            .ledger
            .get_usage_counter_used(tenant_id, &self.meter, period_start)
            .await
        {
            Ok(used) => used,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e.into()),
        };

        Ok(UsageSnapshot {
            tenant_id: ent.tenant_id,
            plan_code: ent.plan_code,
            status: ent.subscription_status,
            period_start,
            period_end,
            used,
            monthly_units: ent.monthly_units,
            remaining: (ent.monthly_units - used).max(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::MemoryLedger;
    use crate::rate_limit::Unlimited;
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 7, 12, 0, 0).unwrap()
    }

    fn service(ledger: &MemoryLedger) -> EntitlementService {
        EntitlementService::new(Arc::new(ledger.clone()))
            .with_clock(Arc::new(ManualClock::new(now())))
            .with_rate_limiter(Arc::new(Unlimited))
    }

    async fn seed(ledger: &MemoryLedger, status: &str, monthly_units: i64) -> Entitlement {
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let ent = Entitlement::new("tenant-a", "pro", start, start + TimeDelta::days(30))
            .with_status(SubscriptionStatus::parse(status))
            .with_monthly_units(monthly_units);
        ledger.upsert_entitlement(&ent).await.unwrap();
        ent
    }

    #[tokio::test]
    async fn test_missing_tenant_denied() {
        let ledger = MemoryLedger::new();
        let svc = service(&ledger);

        let err = svc
            .pre_authorize_tool(&Principal::tenant(""), "list_threads", &ReplayId::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EntitlementError::SubscriptionInactive { ref reason } if reason == "missing_tenant"
        ));
    }

    #[tokio::test]
    async fn test_missing_entitlement_denied() {
        let ledger = MemoryLedger::new();
        let svc = service(&ledger);

        let err = svc
            .pre_authorize_tool(&Principal::tenant("tenant-a"), "list_threads", &ReplayId::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EntitlementError::SubscriptionInactive { ref reason } if reason == "missing_entitlement"
        ));
        assert_eq!(svc.observer().deny_count("tenant-a"), 1);
    }

    #[tokio::test]
    async fn test_unpaid_denied_with_reason() {
        let ledger = MemoryLedger::new();
        seed(&ledger, "unpaid", 10).await;
        let svc = service(&ledger);

        let err = svc
            .pre_authorize_tool(&Principal::tenant("tenant-a"), "list_threads", &ReplayId::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EntitlementError::SubscriptionInactive { ref reason } if reason == "subscription_unpaid"
        ));
    }

    #[tokio::test]
    async fn test_reservation_uses_tool_cost() {
        let ledger = MemoryLedger::new();
        let ent = seed(&ledger, "active", 10).await;
        let svc = service(&ledger).with_costs(CostTable::new(1).with_tool("send_reply", 4));

        let reservation = svc
            .pre_authorize_tool(&Principal::tenant("tenant-a"), "send_reply", &ReplayId::new())
            .await
            .unwrap();
        assert_eq!(reservation.quantity, 4);
        assert_eq!(reservation.used_after, 4);
        assert_eq!(reservation.remaining(), 6);
        assert_eq!(reservation.period_start, ent.usage_period_start);
        assert_eq!(reservation.subscription, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_sync_subscription_sets_grace() {
        let ledger = MemoryLedger::new();
        let ent = seed(&ledger, "active", 10).await;
        let svc = service(&ledger).with_past_due_grace_days(3);

        let updated = svc
            .sync_subscription("tenant-a", SubscriptionUpdate::new("past_due"))
            .await
            .unwrap();
        assert_eq!(updated.subscription_status, SubscriptionStatus::PastDue);
        assert_eq!(updated.grace_until, Some(ent.usage_period_end + TimeDelta::days(3)));

        let active = svc
            .sync_subscription("tenant-a", SubscriptionUpdate::new("active"))
            .await
            .unwrap();
        assert!(active.grace_until.is_none());
    }

    #[tokio::test]
    async fn test_sync_subscription_creates_entitlement() {
        let ledger = MemoryLedger::new();
        let svc = service(&ledger);
        let start = now() - TimeDelta::days(1);
        let end = start + TimeDelta::days(30);

        let missing = svc
            .sync_subscription("tenant-new", SubscriptionUpdate::new("active"))
            .await;
        assert!(matches!(missing, Err(EntitlementError::Ledger(ref e)) if e.is_not_found()));

        let created = svc
            .sync_subscription(
                "tenant-new",
                SubscriptionUpdate::new("trialing")
                    .with_plan(
                        "starter",
                        PlanLimits {
                            rate_per_minute: 30,
                            monthly_units: 500,
                        },
                    )
                    .with_period(start, end),
            )
            .await
            .unwrap();
        assert_eq!(created.plan_code, "starter");
        assert_eq!(created.monthly_units, 500);
        assert_eq!(
            ledger.counter("tenant-new", METER_MCP_UNITS, start).map(|c| c.used),
            Some(0)
        );
    }

    #[tokio::test]
    async fn test_usage_snapshot() {
        let ledger = MemoryLedger::new();
        seed(&ledger, "active", 10).await;
        let svc = service(&ledger);

        let before = svc.usage_snapshot("tenant-a").await.unwrap();
        assert_eq!(before.used, 0);
        assert_eq!(before.remaining, 10);

        svc.pre_authorize_tool(&Principal::tenant("tenant-a"), "list_threads", &ReplayId::new())
            .await
            .unwrap();
        let after = svc.usage_snapshot("tenant-a").await.unwrap();
        assert_eq!(after.used, 1);
        assert_eq!(after.remaining, 9);
    }
}
