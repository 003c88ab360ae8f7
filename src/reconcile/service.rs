//! Two-pass reconciliation sweep.

use std::sync::Arc;

use serde::Serialize;

use crate::clock::{Clock, system_clock};
use crate::entitlements::rollover_window;
use crate::ledger::{LedgerResult, UsageLedger};
use crate::types::METER_MCP_UNITS;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub counters_repaired: usize,
    pub periods_rolled: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.counters_repaired == 0 && self.periods_rolled == 0
    }
}

pub struct ReconcileService {
    ledger: Arc<dyn UsageLedger>,
    clock: Arc<dyn Clock>,
    meter: String,
}

impl std::fmt::Debug for ReconcileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileService")
            .field("ledger", &self.ledger.name())
            .field("meter", &self.meter)
            .finish_non_exhaustive()
    }
}

impl ReconcileService {
    pub fn new(ledger: Arc<dyn UsageLedger>) -> Self {
        Self {
            ledger,
            clock: system_clock(),
            meter: METER_MCP_UNITS.to_string(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Meter whose counter is pre-created for rolled periods.
    pub fn with_meter(mut self, meter: impl Into<String>) -> Self {
        self.meter = meter.into();
        self
    }

    /// Run both passes once.
    ///
    /// The first ledger error aborts the sweep. Repairs written before the
    /// failure stay in place and the next run picks up the rest.
    #[tracing::instrument(skip_all, fields(ledger = self.ledger.name()))]
    pub async fn run(&self) -> LedgerResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        if let Err(e) = self.repair_counters(&mut report).await {
            tracing::warn!(
                error = %e,
                counters_repaired = report.counters_repaired,
                "Counter repair aborted"
            );
            return Err(e);
        }
        if let Err(e) = self.roll_expired_periods(&mut report).await {
            tracing::warn!(
                error = %e,
                periods_rolled = report.periods_rolled,
                "Period rollover aborted"
            );
            return Err(e);
        }

        tracing::info!(
            counters_repaired = report.counters_repaired,
            periods_rolled = report.periods_rolled,
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Overwrite every counter whose `used` disagrees with its successful events.
    async fn repair_counters(&self, report: &mut ReconcileReport) -> LedgerResult<()> {
        for counter in self.ledger.list_usage_counters().await? {
            let expected = self
                .ledger
                .sum_usage_events(
                    &counter.tenant_id,
                    &counter.meter,
                    counter.period_start,
                    counter.period_end,
                )
                .await?;

            if expected != counter.used {
                self.ledger
                    .set_usage_counter_used(
                        &counter.tenant_id,
                        &counter.meter,
                        counter.period_start,
                        expected,
                    )
                    .await?;
                tracing::info!(
                    tenant_id = %counter.tenant_id,
                    meter = %counter.meter,
                    period_start = %counter.period_start,
                    stored = counter.used,
                    expected,
                    "Repaired usage counter drift"
                );
                report.counters_repaired += 1;
            }
        }
        Ok(())
    }

    /// Advance entitlements nobody has touched since their period ended.
    async fn roll_expired_periods(&self, report: &mut ReconcileReport) -> LedgerResult<()> {
        let now = self.clock.now();
        for ent in self.ledger.list_expired_entitlements(now).await? {
            let (start, end) = rollover_window(ent.usage_period_start, ent.usage_period_end, now);
            self.ledger
                .update_usage_period(&ent.tenant_id, start, end)
                .await?;
            self.ledger
                .ensure_usage_counter(&ent.tenant_id, &self.meter, start, end)
                .await?;
            tracing::debug!(
                tenant_id = %ent.tenant_id,
                period_start = %start,
                period_end = %end,
                "Rolled idle tenant period"
            );
            report.periods_rolled += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::MemoryLedger;
    use crate::types::{Entitlement, UsageCounter};
    use chrono::{TimeDelta, TimeZone, Utc};

    #[tokio::test]
    async fn test_empty_ledger_is_clean() {
        let svc = ReconcileService::new(Arc::new(MemoryLedger::new()));
        let report = svc.run().await.unwrap();
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_counter_without_events_is_zeroed() {
        let ledger = MemoryLedger::new();
        let start = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        ledger.put_counter(UsageCounter {
            tenant_id: "tenant-a".into(),
            meter: METER_MCP_UNITS.into(),
            period_start: start,
            period_end: start + TimeDelta::days(30),
            used: 3,
        });

        let svc = ReconcileService::new(Arc::new(ledger.clone()))
            .with_clock(Arc::new(ManualClock::new(start + TimeDelta::days(2))));
        assert_eq!(svc.run().await.unwrap().counters_repaired, 1);
        assert_eq!(ledger.counter("tenant-a", METER_MCP_UNITS, start).unwrap().used, 0);
    }

    #[tokio::test]
    async fn test_rollover_uses_configured_meter() {
        let ledger = MemoryLedger::new();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = start + TimeDelta::days(30);
        ledger
            .upsert_entitlement(&Entitlement::new("tenant-a", "pro", start, end))
            .await
            .unwrap();

        let svc = ReconcileService::new(Arc::new(ledger.clone()))
            .with_clock(Arc::new(ManualClock::new(end + TimeDelta::days(1))))
            .with_meter("api_calls");
        let report = svc.run().await.unwrap();

        assert_eq!(report.periods_rolled, 1);
        assert!(ledger.counter("tenant-a", "api_calls", end).is_some());
        assert!(ledger.counter("tenant-a", METER_MCP_UNITS, end).is_none());
    }
}
