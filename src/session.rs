//! Client-facing conversion flow.
//!
//! ```text
//! sign_in(candidate)
//!   ├─ ""        -> Ok(None)              (nothing submitted yet)
//!   ├─ rejected  -> Err(GateRejected)
//!   └─ accepted  -> ledger.record -> Ok(Some(identifier))
//!
//! convert(identifier, ink)
//!   └─ recognizer.recognize -> tag -> TaggedLatex
//! ```
//!
//! Recognition is an external collaborator behind the [`Recognizer`] trait.
//! A failed recognition has no effect on the ledger.

use crate::error::{LatexGateError, Result};
use crate::gate::{Authorization, Identifier, IdentifierGate, Submission};
use crate::integrity::tagger::{IntegrityTag, annotate, tag};
use crate::ledger::UsageLedger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A point on the handwriting canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// One pen-down to pen-up trace.
pub type Stroke = Vec<Point>;

/// What the student handed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum InkInput {
    /// LaTeX typed directly into the manual entry box.
    Typed(String),
    /// Raw handwriting strokes from the canvas.
    Strokes(Vec<Stroke>),
}

/// Converts ink into LaTeX.
pub trait Recognizer: Send + Sync {
    /// # Errors
    ///
    /// Returns [`LatexGateError::Recognition`] when the input cannot be
    /// converted.
    fn recognize(&self, input: &InkInput) -> Result<String>;
}

/// Passes typed LaTeX through unchanged. Has no handwriting model, so
/// strokes are refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypedEntry;

impl Recognizer for TypedEntry {
    fn recognize(&self, input: &InkInput) -> Result<String> {
        match input {
            InkInput::Typed(latex) => Ok(latex.clone()),
            InkInput::Strokes(strokes) => Err(LatexGateError::Recognition(format!(
                "no handwriting recognizer configured ({} strokes received)",
                strokes.len()
            ))),
        }
    }
}

/// Converted LaTeX ready to hand back to the student.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedLatex {
    pub identifier: Identifier,
    pub latex: String,
    pub tag: IntegrityTag,
    /// `latex` followed by the tag comment
    pub annotated: String,
}

/// Ties gate, ledger and recognizer together for one deployment.
pub struct ConversionSession<R> {
    gate: IdentifierGate,
    ledger: Arc<UsageLedger>,
    recognizer: R,
}

impl<R: Recognizer> ConversionSession<R> {
    pub fn new(gate: IdentifierGate, ledger: Arc<UsageLedger>, recognizer: R) -> Self {
        Self {
            gate,
            ledger,
            recognizer,
        }
    }

    /// Check `candidate` and record the access if it is allowed.
    ///
    /// Returns `Ok(None)` for an empty field.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::GateRejected`] for identifiers not on the
    /// allow-list and [`LatexGateError::Storage`] if the access could not be
    /// recorded. An unrecorded access is never reported as a success.
    pub fn sign_in(&self, candidate: &str) -> Result<Option<Identifier>> {
        match self.gate.check_submission(candidate) {
            Submission::NotSubmitted => Ok(None),
            Submission::Checked(Authorization::Rejected) => {
                tracing::info!("Rejected identifier submission");
                Err(LatexGateError::GateRejected)
            }
            Submission::Checked(Authorization::Authorized(identifier)) => {
                self.ledger.record(&identifier)?;
                Ok(Some(identifier))
            }
        }
    }

    /// Convert `input` and tag the result for `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`LatexGateError::Recognition`] if the recognizer fails.
    pub fn convert(&self, identifier: &Identifier, input: &InkInput) -> Result<TaggedLatex> {
        let latex = self.recognizer.recognize(input).inspect_err(|err| {
            tracing::warn!(identifier = %identifier, error = %err, "Conversion failed");
        })?;
        let tag = tag(identifier, &latex);
        let annotated = annotate(&latex, tag);
        Ok(TaggedLatex {
            identifier: identifier.clone(),
            latex,
            tag,
            annotated,
        })
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::AllowList;
    use crate::ledger::LEDGER_FILE_NAME;
    use tempfile::TempDir;

    fn session() -> (TempDir, ConversionSession<TypedEntry>) {
        let dir = TempDir::new().unwrap();
        let ledger = UsageLedger::open(dir.path().join(LEDGER_FILE_NAME)).unwrap();
        let gate = IdentifierGate::new(AllowList::new(["12345", "67890"], 5).unwrap());
        (dir, ConversionSession::new(gate, Arc::new(ledger), TypedEntry))
    }

    #[test]
    fn test_sign_in_records_usage() {
        let (_dir, session) = session();
        let identifier = session.sign_in("12345").unwrap().unwrap();
        assert_eq!(identifier.as_str(), "12345");

        let events = session.ledger().snapshot().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].identifier, identifier);
    }

    #[test]
    fn test_empty_sign_in_is_pending_and_not_recorded() {
        let (_dir, session) = session();
        assert_eq!(session.sign_in("").unwrap(), None);
        assert!(session.ledger().is_empty().unwrap());
    }

    #[test]
    fn test_rejected_sign_in_is_not_recorded() {
        let (_dir, session) = session();
        let err = session.sign_in("11111").unwrap_err();
        assert!(matches!(err, LatexGateError::GateRejected));
        assert!(session.ledger().is_empty().unwrap());
    }

    #[test]
    fn test_convert_typed_latex() {
        let (_dir, session) = session();
        let identifier = session.sign_in("12345").unwrap().unwrap();

        let tagged = session
            .convert(&identifier, &InkInput::Typed("x^2".to_owned()))
            .unwrap();
        assert_eq!(tagged.latex, "x^2");
        assert_eq!(tagged.annotated, "x^2  % 09686");
    }

    #[test]
    fn test_recognition_failure_leaves_ledger_alone() {
        let (_dir, session) = session();
        let identifier = session.sign_in("67890").unwrap().unwrap();

        let strokes = InkInput::Strokes(vec![vec![Point { x: 0.0, y: 0.0 }, Point { x: 1.0, y: 1.0 }]]);
        let err = session.convert(&identifier, &strokes).unwrap_err();
        assert!(matches!(err, LatexGateError::Recognition(_)));
        assert_eq!(session.ledger().len().unwrap(), 1);
    }

    #[test]
    fn test_ink_input_json_shape() {
        let typed: InkInput = serde_json::from_str(r#"{"kind":"typed","data":"x^2"}"#).unwrap();
        assert_eq!(typed, InkInput::Typed("x^2".to_owned()));

        let strokes: InkInput =
            serde_json::from_str(r#"{"kind":"strokes","data":[[{"x":1.0,"y":2.0}]]}"#).unwrap();
        assert!(matches!(strokes, InkInput::Strokes(ref s) if s.len() == 1));
    }
}
