//! # latexgate
//!
//! Access gate, usage accounting and integrity tagging for a
//! handwriting-to-LaTeX conversion tool.
//!
//! Students identify themselves with a short numeric identifier. Allowed
//! identifiers get their access recorded in a durable ledger, and every piece
//! of LaTeX they receive carries a tag derived from their identifier and the
//! content. An operator periodically exports the ledger as a CSV report,
//! delivers it, and clears the ledger once delivery is confirmed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use latexgate::gate::{AllowList, IdentifierGate};
//! use latexgate::ledger::UsageLedger;
//! use latexgate::session::{ConversionSession, InkInput, TypedEntry};
//! use std::sync::Arc;
//!
//! # fn example() -> latexgate::error::Result<()> {
//! let gate = IdentifierGate::new(AllowList::new(["12345", "67890"], 5)?);
//! let ledger = Arc::new(UsageLedger::open("data/usage_ledger.jsonl")?);
//! let session = ConversionSession::new(gate, ledger, TypedEntry);
//!
//! if let Some(student) = session.sign_in("12345")? {
//!     let tagged = session.convert(&student, &InkInput::Typed(r"\frac{a}{b}".into()))?;
//!     println!("{}", tagged.annotated);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`gate`]: identifier parsing and the allow-list check
//! - [`integrity`]: content tags, report hashing, receipts and verification
//! - [`ledger`]: append-only usage ledger with atomic reset
//! - [`export`]: ledger snapshot to CSV
//! - [`report`]: the export, deliver, reset cycle and its transports
//! - [`session`]: sign-in and conversion flow for clients
//! - [`config`], [`logging`], [`error`]: process plumbing

#![warn(clippy::all, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod export;
pub mod gate;
pub mod integrity;
pub mod ledger;
pub mod logging;
pub mod report;
pub mod session;
