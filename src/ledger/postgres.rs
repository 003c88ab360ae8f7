//! PostgreSQL ledger backend.
//!
//! Enable with the `postgres` feature flag. Tenant scopes run inside one
//! transaction with `app.current_tenant_id` set locally, which the row-level
//! security policies created by [`PostgresLedger::migrate`] key on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgExecutor, PgPool, Postgres, Row, Transaction};

use super::store::{TenantLedger, UsageLedger};
use super::{LedgerError, LedgerResult, StorageResultExt, ensure_tenant};
use crate::types::{
    Entitlement, ExecutionStatus, RecordOutcome, ReplayId, ReserveOutcome, SubscriptionStatus,
    UsageCounter, UsageEvent,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tenant_entitlements (
    tenant_id TEXT PRIMARY KEY,
    plan_code TEXT NOT NULL,
    subscription_status TEXT NOT NULL,
    rate_per_minute BIGINT NOT NULL,
    monthly_units BIGINT NOT NULL,
    usage_period_start TIMESTAMPTZ NOT NULL,
    usage_period_end TIMESTAMPTZ NOT NULL,
    grace_until TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS tenant_usage_counters (
    tenant_id TEXT NOT NULL,
    meter TEXT NOT NULL,
    period_start TIMESTAMPTZ NOT NULL,
    period_end TIMESTAMPTZ NOT NULL,
    used BIGINT NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (tenant_id, meter, period_start)
);

CREATE TABLE IF NOT EXISTS usage_events (
    id UUID PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    meter TEXT NOT NULL,
    quantity BIGINT NOT NULL,
    tool_name TEXT NOT NULL,
    replay_id TEXT,
    audit_id TEXT,
    status TEXT NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_usage_events_replay
    ON usage_events (replay_id) WHERE replay_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_usage_events_window
    ON usage_events (tenant_id, meter, occurred_at);
CREATE INDEX IF NOT EXISTS idx_tenant_entitlements_period_end
    ON tenant_entitlements (usage_period_end);

ALTER TABLE tenant_entitlements ENABLE ROW LEVEL SECURITY;
ALTER TABLE tenant_usage_counters ENABLE ROW LEVEL SECURITY;
ALTER TABLE usage_events ENABLE ROW LEVEL SECURITY;

-- The migrating role owns the tables and queries them too.
ALTER TABLE tenant_entitlements FORCE ROW LEVEL SECURITY;
ALTER TABLE tenant_usage_counters FORCE ROW LEVEL SECURITY;
ALTER TABLE usage_events FORCE ROW LEVEL SECURITY;

DROP POLICY IF EXISTS tenant_isolation ON tenant_entitlements;
CREATE POLICY tenant_isolation ON tenant_entitlements USING (
    COALESCE(current_setting('app.current_tenant_id', true), '') = ''
    OR tenant_id = current_setting('app.current_tenant_id', true)
);
DROP POLICY IF EXISTS tenant_isolation ON tenant_usage_counters;
CREATE POLICY tenant_isolation ON tenant_usage_counters USING (
    COALESCE(current_setting('app.current_tenant_id', true), '') = ''
    OR tenant_id = current_setting('app.current_tenant_id', true)
);
DROP POLICY IF EXISTS tenant_isolation ON usage_events;
CREATE POLICY tenant_isolation ON usage_events USING (
    COALESCE(current_setting('app.current_tenant_id', true), '') = ''
    OR tenant_id = current_setting('app.current_tenant_id', true)
);
"#;

#[derive(Clone, Debug)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Applied with `SET LOCAL` at the start of every tenant scope.
    pub statement_timeout: Option<Duration>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
            statement_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl PostgresConfig {
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn without_statement_timeout(mut self) -> Self {
        self.statement_timeout = None;
        self
    }
}

#[derive(Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
    config: PostgresConfig,
}

impl PostgresLedger {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        Self::connect_with(database_url, PostgresConfig::default()).await
    }

    pub async fn connect_with(database_url: &str, config: PostgresConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
            config,
        })
    }

    pub fn with_pool(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            config: PostgresConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PostgresConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(SCHEMA).execute(&*self.pool).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PostgresLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLedger")
            .field("pool_size", &self.pool.size())
            .field("config", &self.config)
            .finish()
    }
}

fn entitlement_from_row(row: &PgRow) -> LedgerResult<Entitlement> {
    let status: String = row.try_get("subscription_status").storage_err()?;
    Ok(Entitlement {
        tenant_id: row.try_get("tenant_id").storage_err()?,
        plan_code: row.try_get("plan_code").storage_err()?,
        subscription_status: SubscriptionStatus::parse(&status),
        rate_per_minute: row.try_get("rate_per_minute").storage_err()?,
        monthly_units: row.try_get("monthly_units").storage_err()?,
        usage_period_start: row.try_get("usage_period_start").storage_err()?,
        usage_period_end: row.try_get("usage_period_end").storage_err()?,
        grace_until: row.try_get("grace_until").storage_err()?,
        updated_at: row.try_get("updated_at").storage_err()?,
    })
}

fn counter_from_row(row: &PgRow) -> LedgerResult<UsageCounter> {
    Ok(UsageCounter {
        tenant_id: row.try_get("tenant_id").storage_err()?,
        meter: row.try_get("meter").storage_err()?,
        period_start: row.try_get("period_start").storage_err()?,
        period_end: row.try_get("period_end").storage_err()?,
        used: row.try_get("used").storage_err()?,
    })
}

const ENTITLEMENT_COLUMNS: &str = "tenant_id, plan_code, subscription_status, rate_per_minute, \
     monthly_units, usage_period_start, usage_period_end, grace_until, updated_at";

async fn fetch_entitlement<'e>(
    exec: impl PgExecutor<'e>,
    tenant_id: &str,
) -> LedgerResult<Option<Entitlement>> {
    let query = format!(
        "SELECT {} FROM tenant_entitlements WHERE tenant_id = $1",
        ENTITLEMENT_COLUMNS
    );
    let row = sqlx::query(&query)
        .bind(tenant_id)
        .fetch_optional(exec)
        .await
        .storage_err_ctx("get entitlement")?;
    row.as_ref().map(entitlement_from_row).transpose()
}

async fn write_entitlement<'e>(exec: impl PgExecutor<'e>, ent: &Entitlement) -> LedgerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tenant_entitlements (
            tenant_id, plan_code, subscription_status, rate_per_minute, monthly_units,
            usage_period_start, usage_period_end, grace_until, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        ON CONFLICT (tenant_id) DO UPDATE SET
            plan_code = EXCLUDED.plan_code,
            subscription_status = EXCLUDED.subscription_status,
            rate_per_minute = EXCLUDED.rate_per_minute,
            monthly_units = EXCLUDED.monthly_units,
            usage_period_start = EXCLUDED.usage_period_start,
            usage_period_end = EXCLUDED.usage_period_end,
            grace_until = EXCLUDED.grace_until,
            updated_at = NOW()
        "#,
    )
    .bind(&ent.tenant_id)
    .bind(&ent.plan_code)
    .bind(ent.subscription_status.as_str())
    .bind(ent.rate_per_minute)
    .bind(ent.monthly_units)
    .bind(ent.usage_period_start)
    .bind(ent.usage_period_end)
    .bind(ent.grace_until)
    .execute(exec)
    .await
    .storage_err_ctx("upsert entitlement")?;
    Ok(())
}

async fn write_usage_period<'e>(
    exec: impl PgExecutor<'e>,
    tenant_id: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> LedgerResult<()> {
    sqlx::query(
        "UPDATE tenant_entitlements \
         SET usage_period_start = $2, usage_period_end = $3, updated_at = NOW() \
         WHERE tenant_id = $1",
    )
    .bind(tenant_id)
    .bind(period_start)
    .bind(period_end)
    .execute(exec)
    .await
    .storage_err_ctx("update usage period")?;
    Ok(())
}

async fn write_counter<'e>(
    exec: impl PgExecutor<'e>,
    tenant_id: &str,
    meter: &str,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
) -> LedgerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO tenant_usage_counters (tenant_id, meter, period_start, period_end, used)
        VALUES ($1, $2, $3, $4, 0)
        ON CONFLICT (tenant_id, meter, period_start) DO UPDATE SET
            period_end = EXCLUDED.period_end,
            updated_at = NOW()
        "#,
    )
    .bind(tenant_id)
    .bind(meter)
    .bind(period_start)
    .bind(period_end)
    .execute(exec)
    .await
    .storage_err_ctx("ensure usage counter")?;
    Ok(())
}

#[async_trait]
impl UsageLedger for PostgresLedger {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn begin(&self, tenant_id: &str) -> LedgerResult<Box<dyn TenantLedger>> {
        if tenant_id.trim().is_empty() {
            return Err(LedgerError::MissingTenant);
        }
        let mut tx = self.pool.begin().await.storage_err_ctx("begin")?;

        sqlx::query("SELECT set_config('app.current_tenant_id', $1, true)")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await
            .storage_err_ctx("set tenant scope")?;

        if let Some(timeout) = self.config.statement_timeout {
            sqlx::query("SELECT set_config('statement_timeout', $1, true)")
                .bind(timeout.as_millis().to_string())
                .execute(&mut *tx)
                .await
                .storage_err_ctx("set statement timeout")?;
        }

        Ok(Box::new(PgTenantLedger {
            tx,
            tenant_id: tenant_id.to_string(),
        }))
    }

    async fn get_entitlement(&self, tenant_id: &str) -> LedgerResult<Option<Entitlement>> {
        fetch_entitlement(&*self.pool, tenant_id).await
    }

    async fn upsert_entitlement(&self, entitlement: &Entitlement) -> LedgerResult<()> {
        write_entitlement(&*self.pool, entitlement).await
    }

    async fn update_usage_period(
        &self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()> {
        write_usage_period(&*self.pool, tenant_id, period_start, period_end).await
    }

    async fn ensure_usage_counter(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()> {
        write_counter(&*self.pool, tenant_id, meter, period_start, period_end).await
    }

    async fn get_usage_counter_used(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        let row = sqlx::query(
            "SELECT used FROM tenant_usage_counters \
             WHERE tenant_id = $1 AND meter = $2 AND period_start = $3",
        )
        .bind(tenant_id)
        .bind(meter)
        .bind(period_start)
        .fetch_optional(&*self.pool)
        .await
        .storage_err_ctx("get usage counter")?;

        match row {
            Some(row) => row.try_get("used").storage_err(),
            None => Err(LedgerError::not_found(format!(
                "usage counter {}/{}@{}",
                tenant_id, meter, period_start
            ))),
        }
    }

    async fn set_usage_counter_used(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        used: i64,
    ) -> LedgerResult<()> {
        sqlx::query(
            "UPDATE tenant_usage_counters SET used = $4, updated_at = NOW() \
             WHERE tenant_id = $1 AND meter = $2 AND period_start = $3",
        )
        .bind(tenant_id)
        .bind(meter)
        .bind(period_start)
        .bind(used)
        .execute(&*self.pool)
        .await
        .storage_err_ctx("set usage counter")?;
        Ok(())
    }

    async fn list_usage_counters(&self) -> LedgerResult<Vec<UsageCounter>> {
        let rows = sqlx::query(
            "SELECT tenant_id, meter, period_start, period_end, used FROM tenant_usage_counters",
        )
        .fetch_all(&*self.pool)
        .await
        .storage_err_ctx("list usage counters")?;
        rows.iter().map(counter_from_row).collect()
    }

    async fn sum_usage_events(
        &self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(quantity), 0)::BIGINT AS total FROM usage_events \
             WHERE tenant_id = $1 AND meter = $2 AND status = $3 \
             AND occurred_at >= $4 AND occurred_at < $5",
        )
        .bind(tenant_id)
        .bind(meter)
        .bind(ExecutionStatus::Success.as_str())
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&*self.pool)
        .await
        .storage_err_ctx("sum usage events")?;
        row.try_get("total").storage_err()
    }

    async fn list_expired_entitlements(&self, now: DateTime<Utc>) -> LedgerResult<Vec<Entitlement>> {
        let query = format!(
            "SELECT {} FROM tenant_entitlements WHERE usage_period_end < $1",
            ENTITLEMENT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .fetch_all(&*self.pool)
            .await
            .storage_err_ctx("list expired entitlements")?;
        rows.iter().map(entitlement_from_row).collect()
    }
}

/// Tenant scope backed by one database transaction.
///
/// Dropping it without a commit lets sqlx roll the transaction back.
pub struct PgTenantLedger {
    tx: Transaction<'static, Postgres>,
    tenant_id: String,
}

impl std::fmt::Debug for PgTenantLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTenantLedger")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TenantLedger for PgTenantLedger {
    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    async fn get_entitlement(&mut self, tenant_id: &str) -> LedgerResult<Option<Entitlement>> {
        ensure_tenant(&self.tenant_id, tenant_id)?;
        fetch_entitlement(&mut *self.tx, tenant_id).await
    }

    async fn upsert_entitlement(&mut self, entitlement: &Entitlement) -> LedgerResult<()> {
        ensure_tenant(&self.tenant_id, &entitlement.tenant_id)?;
        write_entitlement(&mut *self.tx, entitlement).await
    }

    async fn update_usage_period(
        &mut self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()> {
        ensure_tenant(&self.tenant_id, tenant_id)?;
        write_usage_period(&mut *self.tx, tenant_id, period_start, period_end).await
    }

    async fn ensure_usage_counter(
        &mut self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> LedgerResult<()> {
        ensure_tenant(&self.tenant_id, tenant_id)?;
        write_counter(&mut *self.tx, tenant_id, meter, period_start, period_end).await
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
        let row = sqlx::query(
            r#"
            UPDATE tenant_usage_counters
            SET used = used + $4, updated_at = NOW()
            WHERE tenant_id = $1 AND meter = $2 AND period_start = $3
              AND used + $4 <= $5
            RETURNING used
            "#,
        )
        .bind(tenant_id)
        .bind(meter)
        .bind(period_start)
        .bind(cost)
        .bind(limit)
        .fetch_optional(&mut *self.tx)
        .await
        .storage_err_ctx("reserve units")?;

        match row {
            Some(row) => Ok(ReserveOutcome::reserved(row.try_get("used").storage_err()?)),
            None => Ok(ReserveOutcome::rejected()),
        }
    }

    async fn release_units(
        &mut self,
        tenant_id: &str,
        meter: &str,
        period_start: DateTime<Utc>,
        quantity: i64,
    ) -> LedgerResult<()> {
        ensure_tenant(&self.tenant_id, tenant_id)?;
        sqlx::query(
            "UPDATE tenant_usage_counters \
             SET used = GREATEST(used - $4, 0), updated_at = NOW() \
             WHERE tenant_id = $1 AND meter = $2 AND period_start = $3",
        )
        .bind(tenant_id)
        .bind(meter)
        .bind(period_start)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await
        .storage_err_ctx("release units")?;
        Ok(())
    }

    async fn record_usage_event(&mut self, event: &UsageEvent) -> LedgerResult<RecordOutcome> {
        ensure_tenant(&self.tenant_id, &event.tenant_id)?;
        let result = sqlx::query(
            r#"
            INSERT INTO usage_events (
                id, tenant_id, meter, quantity, tool_name, replay_id, audit_id, status, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (replay_id) WHERE replay_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(&event.tenant_id)
        .bind(&event.meter)
        .bind(event.quantity)
        .bind(&event.tool_name)
        .bind(event.replay_id.as_ref().map(ReplayId::as_str))
        .bind(event.audit_id.as_deref())
        .bind(event.status.as_str())
        .bind(event.occurred_at)
        .execute(&mut *self.tx)
        .await
        .storage_err_ctx("record usage event")?;

        if result.rows_affected() == 0 {
            Ok(RecordOutcome::Duplicate)
        } else {
            Ok(RecordOutcome::Inserted)
        }
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        self.tx.commit().await.storage_err_ctx("commit")
    }
}
