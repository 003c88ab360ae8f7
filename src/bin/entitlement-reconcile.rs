//! Reconciliation sweep over a Postgres ledger.
//!
//! Runs once and exits, or with `--watch` keeps sweeping on
//! `reconcile.interval_secs` until interrupted. Configuration comes from
//! `ENTITLEMENTS_*` environment variables, optionally layered over the file
//! named by `ENTITLEMENTS_CONFIG`.

use std::process::ExitCode;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;

use entitlement_gate::config::{ConfigBuilder, EntitlementSettings};
use entitlement_gate::ledger::{PostgresConfig, PostgresLedger};
use entitlement_gate::observability::init_tracing;
use entitlement_gate::reconcile::{ReconcileScheduler, ReconcileService};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing("info");

    match run(std::env::args().skip(1).any(|arg| arg == "--watch")).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Reconciliation failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(watch: bool) -> Result<(), BoxError> {
    let mut builder = ConfigBuilder::new().env();
    if let Ok(path) = std::env::var("ENTITLEMENTS_CONFIG") {
        builder = builder.file(path);
    }
    let config = builder.build().await?;
    let settings = EntitlementSettings::load(&config).await?;

    let mut pg_config = PostgresConfig::default();
    if let Some(timeout) = settings.database.statement_timeout {
        pg_config = pg_config.statement_timeout(timeout);
    }
    let url = settings.require_database_url()?;
    let ledger = PostgresLedger::connect_with(url.expose_secret(), pg_config).await?;
    ledger.migrate().await?;

    let service = Arc::new(ReconcileService::new(Arc::new(ledger)).with_meter(settings.meter.clone()));

    if !watch {
        let report = service.run().await?;
        tracing::info!(
            counters_repaired = report.counters_repaired,
            periods_rolled = report.periods_rolled,
            "Reconciliation complete"
        );
        return Ok(());
    }

    let cancel_token = CancellationToken::new();
    let handle = ReconcileScheduler::new(service, settings.reconcile_interval).start(cancel_token.clone());

    tokio::signal::ctrl_c().await?;
    cancel_token.cancel();
    handle.await?;
    Ok(())
}
