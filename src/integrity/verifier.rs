//! Verification of tagged LaTeX and of delivered reports.
//!
//! Two checks live here:
//!
//! - [`verify_annotation`] recomputes the tag of an annotated LaTeX snippet
//!   for a given identifier and compares it with the tag in the trailing
//!   comment. Editing the content, or presenting another student's output,
//!   makes the check fail.
//! - [`verify_report`] recomputes the SHA-256 of a report file written by
//!   the outbox delivery and compares it with its receipt.

use crate::error::{LatexGateError, Result};
use crate::gate::Identifier;
use crate::integrity::hasher::compute_file_hash;
use crate::integrity::receipt::{ReportReceipt, load_receipt};
use crate::integrity::tagger::{IntegrityTag, split_annotation, tag};
use serde::Serialize;
use std::path::Path;

/// Result of checking an annotated snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagVerification {
    pub passed: bool,
    pub message: String,
    pub expected_tag: IntegrityTag,
    /// Tag found in the annotation, if there was one
    pub found_tag: Option<IntegrityTag>,
}

impl TagVerification {
    pub fn format_cli(&self) -> String {
        if self.passed {
            format!("✓ PASS: {} (tag {})", self.message, self.expected_tag)
        } else {
            match self.found_tag {
                Some(found) => format!(
                    "✗ FAIL: {}\n  Expected: {}\n  Found:    {found}",
                    self.message, self.expected_tag
                ),
                None => format!("✗ FAIL: {}", self.message),
            }
        }
    }
}

/// Check that `annotated` carries the tag `identifier` would have produced.
pub fn verify_annotation(identifier: &Identifier, annotated: &str) -> TagVerification {
    let Some((content, found)) = split_annotation(annotated) else {
        return TagVerification {
            passed: false,
            message: "No integrity tag found".to_owned(),
            expected_tag: tag(identifier, annotated),
            found_tag: None,
        };
    };

    let expected = tag(identifier, content);
    if expected == found {
        TagVerification {
            passed: true,
            message: "Integrity tag matches".to_owned(),
            expected_tag: expected,
            found_tag: Some(found),
        }
    } else {
        TagVerification {
            passed: false,
            message: "Integrity tag mismatch".to_owned(),
            expected_tag: expected,
            found_tag: Some(found),
        }
    }
}

/// Result of checking a report file against its receipt.
#[derive(Debug, Clone, Serialize)]
pub struct ReportVerification {
    pub passed: bool,
    pub message: String,
    pub file_path: String,
    pub expected_hash: String,
    pub actual_hash: Option<String>,
    pub receipt: ReportReceipt,
}

impl ReportVerification {
    fn pass(file_path: String, hash: String, receipt: ReportReceipt) -> Self {
        Self {
            passed: true,
            message: "Report integrity verified successfully".to_owned(),
            file_path,
            expected_hash: hash.clone(),
            actual_hash: Some(hash),
            receipt,
        }
    }

    fn fail(
        file_path: String,
        actual: Option<String>,
        reason: String,
        receipt: ReportReceipt,
    ) -> Self {
        Self {
            passed: false,
            message: reason,
            file_path,
            expected_hash: receipt.integrity.hash.clone(),
            actual_hash: actual,
            receipt,
        }
    }

    pub fn format_cli(&self) -> String {
        if self.passed {
            format!(
                "✓ PASS: Report integrity verified\n  \
                File: {}\n  \
                Hash: {} ({})\n  \
                Rows: {}\n  \
                Created: {}",
                self.file_path,
                self.expected_hash.get(..16).unwrap_or(&self.expected_hash),
                self.receipt.integrity.hash_algorithm,
                self.receipt.report.row_count,
                self.receipt.created_utc.format("%Y-%m-%d %H:%M:%S UTC")
            )
        } else {
            let mut output = format!(
                "✗ FAIL: {}\n  File: {}\n  Expected: {}\n  ",
                self.message, self.file_path, self.expected_hash
            );
            if let Some(actual) = &self.actual_hash {
                output.push_str(&format!("Actual:   {actual}\n  "));
            }
            output.push_str("Report may have been modified or corrupted");
            output
        }
    }
}

/// Verify a report file using its `.receipt.json`.
///
/// The report is looked up next to the receipt, by the file name the
/// receipt records.
///
/// # Errors
///
/// Returns error if the receipt cannot be read or parsed. A missing or
/// modified report is a failed verification, not an error.
pub fn verify_report(receipt_path: &Path) -> Result<ReportVerification> {
    let receipt = load_receipt(receipt_path)?;

    let receipt_dir = receipt_path.parent().ok_or_else(|| {
        LatexGateError::Other("Receipt has no parent directory".to_owned())
    })?;
    let report_path = receipt_dir.join(&receipt.report.filename);
    let display = report_path.display().to_string();

    if !report_path.exists() {
        let reason = format!(
            "Report file not found: {}. File may have been moved or deleted.",
            receipt.report.filename
        );
        return Ok(ReportVerification::fail(display, None, reason, receipt));
    }

    let actual_hash = match compute_file_hash(&report_path) {
        Ok(hash) => hash,
        Err(e) => {
            let reason = format!("Failed to compute hash: {e}");
            return Ok(ReportVerification::fail(display, None, reason, receipt));
        }
    };

    if actual_hash == receipt.integrity.hash {
        Ok(ReportVerification::pass(display, actual_hash, receipt))
    } else {
        Ok(ReportVerification::fail(
            display,
            Some(actual_hash),
            "Hash mismatch detected".to_owned(),
            receipt,
        ))
    }
}
