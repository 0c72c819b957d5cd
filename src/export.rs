//! Ledger export.
//!
//! Turns a ledger snapshot into the report table handed to a delivery
//! transport:
//!
//! ```text
//! Identifier,Timestamp
//! 12345,2026-10-17T08:30:00.123Z
//! 67890,2026-10-17T08:31:12.004Z
//! ```
//!
//! Rows keep ledger insertion order. Timestamps are RFC 3339 UTC with
//! millisecond precision.

use crate::error::{LatexGateError, Result, ResultExt as _};
use crate::ledger::UsageEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use polars::prelude::*;
use uuid::Uuid;

pub const IDENTIFIER_COLUMN: &str = "Identifier";
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// A rendered usage report, ready for delivery.
#[derive(Debug, Clone)]
pub struct LedgerExport {
    pub report_id: Uuid,
    pub generated_utc: DateTime<Utc>,
    pub events: Vec<UsageEvent>,
    /// CSV bytes with a header row.
    pub csv: Vec<u8>,
}

impl LedgerExport {
    /// Render `events` as the report table.
    ///
    /// # Errors
    ///
    /// Returns error if `events` is empty (there is nothing to report) or if
    /// the table cannot be serialized.
    pub fn from_events(events: Vec<UsageEvent>) -> Result<Self> {
        if events.is_empty() {
            return Err(LatexGateError::Other(
                "Refusing to export an empty ledger".to_owned(),
            ));
        }

        let mut table = usage_table(&events)?;
        let mut csv = Vec::new();
        CsvWriter::new(&mut csv)
            .include_header(true)
            .finish(&mut table)
            .context("Failed to write usage report CSV")?;

        Ok(Self {
            report_id: Uuid::new_v4(),
            generated_utc: Utc::now(),
            events,
            csv,
        })
    }

    pub fn row_count(&self) -> usize {
        self.events.len()
    }

    /// File name used when the report is written to disk or attached.
    pub fn file_name(&self) -> String {
        format!(
            "usage_report_{}_{}.csv",
            self.generated_utc.format("%Y%m%dT%H%M%SZ"),
            self.report_id.simple()
        )
    }
}

/// Build the two-column usage table.
///
/// # Errors
///
/// Returns error if the columns cannot be assembled into a table.
pub fn usage_table(events: &[UsageEvent]) -> Result<DataFrame> {
    let identifiers: Vec<String> = events
        .iter()
        .map(|e| e.identifier.as_str().to_owned())
        .collect();
    let timestamps: Vec<String> = events
        .iter()
        .map(|e| format_timestamp(e.timestamp))
        .collect();

    let table = df! {
        IDENTIFIER_COLUMN => identifiers,
        TIMESTAMP_COLUMN => timestamps,
    }?;
    Ok(table)
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
