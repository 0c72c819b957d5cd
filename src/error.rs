//! Centralized error handling for latexgate.
//!
//! Every fallible operation in the library returns [`Result<T>`], whose error
//! side is the [`LatexGateError`] enum. Each variant maps to one failure kind
//! the caller can act on:
//!
//! - [`LatexGateError::GateRejected`]: the identifier is not on the allow-list.
//!   Non-fatal, the user may try again.
//! - [`LatexGateError::Storage`]: the usage ledger could not be read, appended
//!   to or reset.
//! - [`LatexGateError::DeliveryFailed`]: a report could not be transmitted. The
//!   ledger is untouched, so the cycle can be retried later.
//! - [`LatexGateError::Recognition`]: the recognition collaborator failed to
//!   convert ink into LaTeX.
//!
//! ```
//! use latexgate::error::LatexGateError;
//!
//! fn user_message(err: &LatexGateError) -> String {
//!     match err {
//!         LatexGateError::GateRejected => "Invalid Student ID".to_owned(),
//!         LatexGateError::Recognition(_) => "Conversion failed".to_owned(),
//!         other => other.to_string(),
//!     }
//! }
//! # assert_eq!(user_message(&LatexGateError::GateRejected), "Invalid Student ID");
//! ```
//!
//! ## Context Extension Trait
//!
//! [`ResultExt`] adds `.context()` to any `Result` whose error converts into
//! [`LatexGateError`], and `.storage_context()` for ledger I/O so that file
//! system failures surface as [`LatexGateError::Storage`]:
//!
//! ```no_run
//! use latexgate::error::ResultExt as _;
//! use std::fs;
//!
//! fn load_ledger() -> latexgate::error::Result<String> {
//!     fs::read_to_string("usage_ledger.jsonl").storage_context(|| "Failed to read ledger".to_owned())
//! }
//! ```

use std::fmt;

/// Main error type for latexgate operations.
#[derive(Debug)]
pub enum LatexGateError {
    /// I/O errors outside the ledger (config files, report outbox)
    Io(std::io::Error),

    /// Identifier is not on the allow-list
    GateRejected,

    /// Ledger read, append or reset failed
    Storage(String),

    /// Report export succeeded but transmission failed
    DeliveryFailed(String),

    /// The recognition collaborator could not produce LaTeX
    Recognition(String),

    /// Configuration errors
    Config(String),

    /// Generic error with context
    Other(String),
}

impl fmt::Display for LatexGateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::GateRejected => write!(f, "Identifier rejected"),
            Self::Storage(msg) => write!(f, "Storage error: {msg}"),
            Self::DeliveryFailed(msg) => write!(f, "Delivery failed: {msg}"),
            Self::Recognition(msg) => write!(f, "Conversion failed: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for LatexGateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LatexGateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<anyhow::Error> for LatexGateError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<serde_json::Error> for LatexGateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("JSON error: {err}"))
    }
}

impl From<polars::error::PolarsError> for LatexGateError {
    fn from(err: polars::error::PolarsError) -> Self {
        Self::Other(format!("Export table error: {err}"))
    }
}

impl From<tempfile::PersistError> for LatexGateError {
    fn from(err: tempfile::PersistError) -> Self {
        Self::Io(err.error)
    }
}

impl From<LatexGateError> for String {
    fn from(err: LatexGateError) -> Self {
        err.to_string()
    }
}

/// Result type alias for latexgate operations.
pub type Result<T> = std::result::Result<T, LatexGateError>;

/// Extension trait to add context to results.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;

    /// Add context using a closure (lazy evaluation).
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    /// Wrap the error as a [`LatexGateError::Storage`] failure.
    fn storage_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<LatexGateError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err: LatexGateError = e.into();
            LatexGateError::Other(format!("{}: {}", msg.into(), err))
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: LatexGateError = e.into();
            LatexGateError::Other(format!("{}: {}", f(), err))
        })
    }

    fn storage_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err: LatexGateError = e.into();
            LatexGateError::Storage(format!("{}: {}", f(), err))
        })
    }
}
