//! Identifier gate.
//!
//! Decides whether a submitted identifier may use the conversion tool. The
//! allow-list is built once at startup from configuration and never changes
//! afterwards; [`IdentifierGate::authorize`] is a pure membership test over it.
//!
//! A rejection deliberately carries no reason. Telling "malformed" apart from
//! "unknown" would let a caller enumerate the allow-list.
//!
//! ```
//! use latexgate::gate::{AllowList, Authorization, IdentifierGate};
//!
//! # fn example() -> latexgate::error::Result<()> {
//! let allow_list = AllowList::new(["12345", "67890"], 5)?;
//! let gate = IdentifierGate::new(allow_list);
//!
//! assert!(matches!(gate.authorize("12345"), Authorization::Authorized(_)));
//! assert_eq!(gate.authorize("99999"), Authorization::Rejected);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::error::{LatexGateError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;

/// Length of identifiers in the observed deployment (5-digit student IDs).
pub const DEFAULT_IDENTIFIER_LENGTH: usize = 5;

/// A validated identifier.
///
/// Only obtainable from [`Identifier::parse`] (used while loading the
/// allow-list) or from a successful [`IdentifierGate::authorize`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Parse a token of exactly `length` ASCII alphanumeric characters.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] when the token is empty, has the
    /// wrong length or contains anything other than ASCII letters and digits.
    pub fn parse(token: &str, length: usize) -> Result<Self> {
        if token.is_empty() {
            return Err(LatexGateError::Config(
                "identifier must not be empty".to_owned(),
            ));
        }
        if token.chars().count() != length {
            return Err(LatexGateError::Config(format!(
                "identifier {token:?} must be exactly {length} characters"
            )));
        }
        if !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LatexGateError::Config(format!(
                "identifier {token:?} must be ASCII letters or digits"
            )));
        }
        Ok(Self(token.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Static set of identifiers permitted to use the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    members: BTreeSet<Identifier>,
}

impl AllowList {
    /// Build an allow-list, validating every entry.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Config`] if an entry is not a valid
    /// identifier of `length` characters, or if an entry appears twice.
    pub fn new<I, S>(entries: I, length: usize) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut members = BTreeSet::new();
        for entry in entries {
            let identifier = Identifier::parse(entry.as_ref(), length)?;
            if members.contains(&identifier) {
                return Err(LatexGateError::Config(format!(
                    "identifier {identifier} appears more than once in the allow-list"
                )));
            }
            members.insert(identifier);
        }
        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn lookup(&self, candidate: &str) -> Option<&Identifier> {
        self.members.get(candidate)
    }
}

/// Outcome of [`IdentifierGate::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    Authorized(Identifier),
    Rejected,
}

/// State of a form submission, as seen by the caller.
///
/// An empty field means the user has not submitted anything yet, which is
/// not the same as a rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    NotSubmitted,
    Checked(Authorization),
}

/// Validates submitted identifiers against an [`AllowList`].
#[derive(Debug, Clone)]
pub struct IdentifierGate {
    allow_list: AllowList,
}

impl IdentifierGate {
    pub fn new(allow_list: AllowList) -> Self {
        Self { allow_list }
    }

    /// Exact membership test. No trimming, no case folding.
    pub fn authorize(&self, candidate: &str) -> Authorization {
        match self.allow_list.lookup(candidate) {
            Some(identifier) => Authorization::Authorized(identifier.clone()),
            None => Authorization::Rejected,
        }
    }

    /// Like [`authorize`](Self::authorize), but maps an empty field to
    /// [`Submission::NotSubmitted`].
    pub fn check_submission(&self, candidate: &str) -> Submission {
        if candidate.is_empty() {
            Submission::NotSubmitted
        } else {
            Submission::Checked(self.authorize(candidate))
        }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }
}
