//! Integrity tagging and verification.
//!
//! ## Tagging converted LaTeX
//!
//! Every snippet handed back to a student carries a 5-digit tag derived from
//! the student's identifier and the snippet itself:
//!
//! ```
//! use latexgate::gate::Identifier;
//! use latexgate::integrity::{annotate, tag, verify_annotation};
//!
//! # fn example() -> latexgate::error::Result<()> {
//! let student = Identifier::parse("12345", 5)?;
//! let annotated = annotate("x^2", tag(&student, "x^2"));
//! assert_eq!(annotated, "x^2  % 09686");
//!
//! assert!(verify_annotation(&student, &annotated).passed);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! The tag sits behind a `%`, so the annotated text is still valid LaTeX.
//!
//! ## Report receipts
//!
//! Reports written to the outbox get a `.receipt.json` next to them holding
//! the SHA-256 of the CSV, so an operator can later check that a report was
//! not edited after it left the tool.
//!
//! ## Architecture
//!
//! - [`tagger`]: tag derivation and annotation format
//! - [`hasher`]: SHA-256 helpers for report files
//! - [`receipt`]: receipt data structures
//! - [`verifier`]: tag and receipt verification

pub mod hasher;
pub mod receipt;
pub mod tagger;
pub mod verifier;

pub use hasher::compute_file_hash;
pub use receipt::{ReportReceipt, create_receipt, receipt_path_for};
pub use tagger::{IntegrityTag, annotate, split_annotation, tag};
pub use verifier::{ReportVerification, TagVerification, verify_annotation, verify_report};
