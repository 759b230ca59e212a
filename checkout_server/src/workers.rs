//! Background sweepers. Each one runs on its own interval and logs its outcome. Do not await the returned JoinHandles,
//! as they run indefinitely.
use std::time::Duration;

use checkout_engine::{
    ledger::RpcLedgerClient,
    sweepers::{PendingPaymentMonitor, PendingTransactionVerifier, StaleDraftCleanup},
    SqliteDatabase,
};
use log::*;
use tokio::task::JoinHandle;

pub fn start_draft_cleanup_worker(
    sweeper: StaleDraftCleanup<SqliteDatabase>,
    interval: Duration,
    max_age: chrono::Duration,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("🕰️ Stale draft cleanup worker is disabled");
        return None;
    }
    let handle = tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Stale draft cleanup worker started");
        loop {
            timer.tick().await;
            debug!("🕰️ Running stale draft cleanup");
            match sweeper.run(max_age).await {
                Ok(report) => info!("🕰️ {} stale drafts removed", report.removed),
                Err(e) => error!("🕰️ Error running stale draft cleanup. {e}"),
            }
        }
    });
    Some(handle)
}

pub fn start_pending_report_worker(
    monitor: PendingPaymentMonitor<SqliteDatabase>,
    interval: Duration,
    max_age: chrono::Duration,
    limit: u32,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("🕰️ Pending payment report worker is disabled");
        return None;
    }
    let handle = tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Pending payment report worker started");
        loop {
            timer.tick().await;
            match monitor.run(max_age, limit).await {
                Ok(report) if report.total > 0 => {
                    let rails = report
                        .by_rail
                        .iter()
                        .map(|(rail, stats)| format!("{rail}: {}", stats.count))
                        .chain((report.unclassified.count > 0).then(|| format!("unclassified: {}", report.unclassified.count)))
                        .collect::<Vec<String>>()
                        .join(", ");
                    warn!("🕰️ {} orders are stuck in pending_payment ({rails})", report.total);
                },
                Ok(_) => debug!("🕰️ No orders are stuck in pending_payment"),
                Err(e) => error!("🕰️ Error running the pending payment report. {e}"),
            }
        }
    });
    Some(handle)
}

pub fn start_verification_worker(
    verifier: PendingTransactionVerifier<SqliteDatabase, RpcLedgerClient>,
    interval: Duration,
    batch_size: u32,
) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        info!("🕰️ Blockchain verification worker is disabled");
        return None;
    }
    let handle = tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Blockchain verification worker started");
        loop {
            timer.tick().await;
            match verifier.run(batch_size).await {
                Ok(report) => debug!(
                    "🕰️ Verification sweep: {} confirmed, {} failed, {} deferred",
                    report.confirmed, report.failed, report.deferred
                ),
                Err(e) => error!("🕰️ Error running the verification sweep. {e}"),
            }
        }
    });
    Some(handle)
}
