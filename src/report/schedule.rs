//! Periodic report trigger.
//!
//! Optional wrapper around [`ReportScheduler::run_report_cycle`] that runs a
//! cycle on a fixed interval until told to stop. The first cycle runs
//! immediately. Each cycle runs on the blocking pool, since both the ledger
//! and the delivery transports do synchronous I/O.

use super::{Delivery, ReportOutcome, ReportScheduler};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// Default interval between cycles (once a day).
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Summary of a periodic run, returned on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub cycles: u64,
    pub delivered_events: u64,
    pub failed_deliveries: u64,
    pub storage_errors: u64,
}

/// Run report cycles every `interval` until `shutdown` fires.
///
/// Cycle failures are logged and counted; they never stop the loop.
pub async fn run_periodic<D>(
    scheduler: Arc<ReportScheduler>,
    delivery: Arc<D>,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> ScheduleSummary
where
    D: Delivery + ?Sized + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut summary = ScheduleSummary::default();

    tracing::info!(interval_secs = interval.as_secs(), "Periodic usage reports enabled");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(cycles = summary.cycles, "Periodic usage reports stopped");
                return summary;
            }
            _ = ticker.tick() => {
                let scheduler = Arc::clone(&scheduler);
                let delivery = Arc::clone(&delivery);
                let result = tokio::task::spawn_blocking(move || {
                    scheduler.run_report_cycle(delivery.as_ref())
                })
                .await;

                summary.cycles += 1;
                match result {
                    Ok(outcome) => record_outcome(&mut summary, outcome),
                    Err(join_err) => {
                        tracing::error!(error = %join_err, "Report cycle task panicked");
                        summary.storage_errors += 1;
                    }
                }
            }
        }
    }
}

fn record_outcome(summary: &mut ScheduleSummary, outcome: Result<ReportOutcome>) {
    match outcome {
        Ok(ReportOutcome::Delivered { events }) => {
            summary.delivered_events += events as u64;
        }
        Ok(ReportOutcome::NothingToReport) => {}
        Ok(ReportOutcome::DeliveryFailed { cause }) => {
            tracing::warn!(%cause, "Scheduled report not delivered, will retry next cycle");
            summary.failed_deliveries += 1;
        }
        Err(err) => {
            tracing::error!(error = %err, "Scheduled report cycle failed");
            summary.storage_errors += 1;
        }
    }
}
