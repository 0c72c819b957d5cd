//! Usage report cycle.
//!
//! A report cycle exports the ledger, hands the export to a [`Delivery`] and
//! clears the ledger only once delivery has been confirmed:
//!
//! ```text
//! snapshot ──empty──> NothingToReport
//!    │
//!    └─> export ─> deliver ──err──> DeliveryFailed   (ledger untouched)
//!                     │
//!                     └─ok─> reset_delivered ─> Delivered
//! ```
//!
//! The reset removes exactly the delivered events, so an access recorded
//! while the report was in flight stays in the ledger for the next cycle.
//!
//! ```no_run
//! use latexgate::ledger::UsageLedger;
//! use latexgate::report::{ReportOutcome, ReportScheduler, delivery::OutboxDelivery};
//! use std::sync::Arc;
//!
//! # fn example() -> latexgate::error::Result<()> {
//! let ledger = Arc::new(UsageLedger::open("data/usage_ledger.jsonl")?);
//! let scheduler = ReportScheduler::new(Arc::clone(&ledger));
//! let outbox = OutboxDelivery::new("data/outbox");
//!
//! match scheduler.run_report_cycle(&outbox)? {
//!     ReportOutcome::Delivered { events } => println!("sent {events} events"),
//!     ReportOutcome::NothingToReport => println!("nothing to send"),
//!     ReportOutcome::DeliveryFailed { cause } => eprintln!("will retry: {cause}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod delivery;
pub mod schedule;

use crate::error::{LatexGateError, Result};
use crate::export::LedgerExport;
use crate::ledger::UsageLedger;
use std::sync::{Arc, Mutex};

/// Outbound transport for usage reports.
///
/// Any error returned is treated as a failed delivery. Implementations own
/// their timeouts; a timeout must surface as an error.
pub trait Delivery: Send + Sync {
    /// Transmit `export`.
    ///
    /// # Errors
    ///
    /// Returns error when the report was not confirmed delivered.
    fn deliver(&self, export: &LedgerExport) -> Result<()>;
}

impl<F> Delivery for F
where
    F: Fn(&LedgerExport) -> Result<()> + Send + Sync,
{
    fn deliver(&self, export: &LedgerExport) -> Result<()> {
        self(export)
    }
}

/// How a report cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The ledger was empty; nothing was sent and nothing was reset.
    NothingToReport,
    /// The report was delivered and the delivered events were cleared.
    Delivered { events: usize },
    /// Delivery failed; the ledger still holds every event.
    DeliveryFailed { cause: String },
}

/// Runs export, deliver, reset as one unit over a shared ledger.
#[derive(Debug)]
pub struct ReportScheduler {
    ledger: Arc<UsageLedger>,
    cycle: Mutex<()>,
}

impl ReportScheduler {
    pub fn new(ledger: Arc<UsageLedger>) -> Self {
        Self {
            ledger,
            cycle: Mutex::new(()),
        }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Run one report cycle. Cycles on the same scheduler never overlap.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Storage`] if the ledger cannot be read, or
    /// cannot be cleared after a successful delivery. In the latter case the
    /// events remain and will be reported again by the next cycle.
    pub fn run_report_cycle<D>(&self, delivery: &D) -> Result<ReportOutcome>
    where
        D: Delivery + ?Sized,
    {
        let _cycle = self
            .cycle
            .lock()
            .map_err(|_poisoned| LatexGateError::Other("Report cycle lock poisoned".to_owned()))?;

        let snapshot = self.ledger.snapshot()?;
        if snapshot.is_empty() {
            tracing::info!("Usage ledger empty, nothing to report");
            return Ok(ReportOutcome::NothingToReport);
        }

        let export = LedgerExport::from_events(snapshot)?;
        tracing::info!(
            report_id = %export.report_id,
            events = export.row_count(),
            "Delivering usage report"
        );

        if let Err(err) = delivery.deliver(&export) {
            tracing::warn!(
                report_id = %export.report_id,
                error = %err,
                "Usage report delivery failed, ledger preserved"
            );
            return Ok(ReportOutcome::DeliveryFailed {
                cause: err.to_string(),
            });
        }

        if let Err(err) = self.ledger.reset_delivered(&export.events) {
            tracing::error!(
                report_id = %export.report_id,
                error = %err,
                "Report delivered but ledger could not be cleared; it will be resent"
            );
            return Err(err);
        }

        tracing::info!(report_id = %export.report_id, events = export.row_count(), "Usage report delivered");
        Ok(ReportOutcome::Delivered {
            events: export.row_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Identifier;
    use crate::ledger::LEDGER_FILE_NAME;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn id(token: &str) -> Identifier {
        Identifier::parse(token, 5).unwrap()
    }

    fn scheduler() -> (TempDir, ReportScheduler) {
        let dir = TempDir::new().unwrap();
        let ledger = UsageLedger::open(dir.path().join(LEDGER_FILE_NAME)).unwrap();
        (dir, ReportScheduler::new(Arc::new(ledger)))
    }

    #[test]
    fn test_empty_ledger_never_delivers() {
        let (_dir, scheduler) = scheduler();
        let calls = AtomicUsize::new(0);
        let delivery = |_: &LedgerExport| -> Result<()> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        let outcome = scheduler.run_report_cycle(&delivery).unwrap();
        assert_eq!(outcome, ReportOutcome::NothingToReport);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(scheduler.ledger().snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_failed_delivery_preserves_ledger() {
        let (_dir, scheduler) = scheduler();
        scheduler.ledger().record(&id("12345")).unwrap();
        scheduler.ledger().record(&id("67890")).unwrap();
        let before = scheduler.ledger().snapshot().unwrap();

        let failing = |_: &LedgerExport| -> Result<()> {
            Err(LatexGateError::DeliveryFailed("smtp unreachable".to_owned()))
        };
        let outcome = scheduler.run_report_cycle(&failing).unwrap();

        match outcome {
            ReportOutcome::DeliveryFailed { cause } => assert!(cause.contains("smtp unreachable")),
            other => panic!("expected DeliveryFailed, got {other:?}"),
        }
        assert_eq!(scheduler.ledger().snapshot().unwrap(), before);
    }

    #[test]
    fn test_successful_delivery_resets_and_second_cycle_is_noop() {
        let (_dir, scheduler) = scheduler();
        scheduler.ledger().record(&id("12345")).unwrap();

        let delivered = Mutex::new(Vec::new());
        let capture = |export: &LedgerExport| -> Result<()> {
            delivered.lock().unwrap().push(export.csv.clone());
            Ok(())
        };

        assert_eq!(
            scheduler.run_report_cycle(&capture).unwrap(),
            ReportOutcome::Delivered { events: 1 }
        );
        assert!(scheduler.ledger().snapshot().unwrap().is_empty());
        assert_eq!(
            scheduler.run_report_cycle(&capture).unwrap(),
            ReportOutcome::NothingToReport
        );

        let sent = delivered.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let csv = String::from_utf8(sent[0].clone()).unwrap();
        assert!(csv.starts_with("Identifier,Timestamp\n12345,"));
    }

    #[test]
    fn test_event_recorded_during_delivery_survives() {
        let (_dir, scheduler) = scheduler();
        let ledger = Arc::clone(&scheduler.ledger);
        ledger.record(&id("12345")).unwrap();

        let delivery = |_: &LedgerExport| -> Result<()> {
            ledger.record(&id("67890")).map(|_| ())
        };
        assert_eq!(
            scheduler.run_report_cycle(&delivery).unwrap(),
            ReportOutcome::Delivered { events: 1 }
        );

        let remaining = scheduler.ledger().snapshot().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].identifier.as_str(), "67890");
    }
}
