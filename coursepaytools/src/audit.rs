use anyhow::{anyhow, Result};
use coursepay_engine::{
    api::{ReconciliationApi, ReconciliationError, ReconciliationParams},
    config::ReconciliationConfig,
    SqliteDatabase,
};
use log::*;

use crate::{AuditParams, AuditWorkerParams};

impl From<AuditParams> for ReconciliationParams {
    fn from(p: AuditParams) -> Self {
        Self {
            start_delta_minutes: p.start_delta,
            end_delta_minutes: p.end_delta,
            threshold: p.threshold,
            support_mode: p.support,
        }
    }
}

async fn connect() -> Result<ReconciliationApi<SqliteDatabase>> {
    let db = SqliteDatabase::new(5).await.map_err(|e| anyhow!("Could not connect to the database: {e}"))?;
    Ok(ReconciliationApi::new(db, ReconciliationConfig::from_env_or_default()))
}

/// Runs one audit and prints the report. The process exit code carries the verdict, so schedulers and alerting can
/// key off it directly.
pub async fn print_audit(params: AuditParams) -> Result<()> {
    let auditor = connect().await?;
    match auditor.run(params.into()).await {
        Ok(report) => {
            println!("{report}");
            Ok(())
        },
        Err(ReconciliationError::ThresholdExceeded(report)) => {
            println!("{report}");
            Err(anyhow!("Audit failed: {}", report.summary()))
        },
        Err(e) => Err(anyhow!("Audit could not run: {e}")),
    }
}

/// Runs the audit on an interval, forever. A failed run is logged and the worker keeps going; this is the
/// always-on deployment mode, where alerting watches the logs rather than the exit code.
pub async fn run_audit_worker(params: AuditWorkerParams) -> Result<()> {
    let auditor = connect().await?;
    let mut timer = tokio::time::interval(std::time::Duration::from_secs(params.interval * 60));
    info!("🔎️ Audit worker started (every {} minutes)", params.interval);
    loop {
        timer.tick().await;
        info!("🔎️ Running scheduled transaction audit");
        match auditor.run(params.audit.into()).await {
            Ok(report) => {
                info!("🔎️ {}", report.summary());
            },
            Err(ReconciliationError::ThresholdExceeded(report)) => {
                error!("🔎️ Audit failed: {report}");
            },
            Err(e) => {
                error!("🔎️ Audit could not run: {e}");
            },
        }
    }
}
