//! Integrity receipts for delivered usage reports.

use crate::error::{Result, ResultExt as _};
use crate::export::LedgerExport;
use crate::integrity::hasher::{HASH_ALGORITHM, digest_hex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Current receipt schema version.
pub const RECEIPT_VERSION: u32 = 1;

/// Receipt written next to an exported usage report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportReceipt {
    pub receipt_version: u32,
    pub created_utc: DateTime<Utc>,
    pub producer: ProducerInfo,
    pub report: ReportInfo,
    pub integrity: IntegrityInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub app_name: String,
    pub app_version: String,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportInfo {
    pub report_id: Uuid,
    /// Report file name, relative to the receipt's directory
    pub filename: String,
    pub file_size_bytes: u64,
    pub row_count: usize,
    /// Timestamp of the first event in the report
    pub first_event_utc: Option<DateTime<Utc>>,
    /// Timestamp of the last event in the report
    pub last_event_utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityInfo {
    pub hash_algorithm: String,
    pub hash: String,
}

/// Describe `export` as it will be written under `filename`.
pub fn create_receipt(export: &LedgerExport, filename: &str) -> ReportReceipt {
    ReportReceipt {
        receipt_version: RECEIPT_VERSION,
        created_utc: Utc::now(),
        producer: ProducerInfo {
            app_name: env!("CARGO_PKG_NAME").to_owned(),
            app_version: env!("CARGO_PKG_VERSION").to_owned(),
            platform: std::env::consts::OS.to_owned(),
        },
        report: ReportInfo {
            report_id: export.report_id,
            filename: filename.to_owned(),
            file_size_bytes: export.csv.len() as u64,
            row_count: export.row_count(),
            first_event_utc: export.events.first().map(|e| e.timestamp),
            last_event_utc: export.events.last().map(|e| e.timestamp),
        },
        integrity: IntegrityInfo {
            hash_algorithm: HASH_ALGORITHM.to_owned(),
            hash: digest_hex(&export.csv),
        },
    }
}

/// Path of the receipt belonging to `report_path` (`<name>.csv.receipt.json`).
pub fn receipt_path_for(report_path: &Path) -> PathBuf {
    let mut name = report_path.as_os_str().to_owned();
    name.push(".receipt.json");
    PathBuf::from(name)
}

/// Serialize a receipt as pretty JSON.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn receipt_json(receipt: &ReportReceipt) -> Result<String> {
    serde_json::to_string_pretty(receipt).context("Failed to serialize receipt")
}

/// Load a receipt from disk.
///
/// # Errors
///
/// Returns error if the file cannot be read or is not a valid receipt.
pub fn load_receipt(path: &Path) -> Result<ReportReceipt> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read receipt: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse receipt: {}", path.display()))
}
