//! Diagnostics are data on the result, never thrown. The one hard failure
//! is a caller contract violation (`AnalysisError`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only error the engine ever returns. Everything recoverable is a
/// `Diagnostic` on the analysis report instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("no model supplied: the snapshot contains zero tables")]
    EmptyModel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Expression text does not match the recognized routing-rule shape.
    MalformedExpression,
    /// Table scored below the classifier's acceptance threshold.
    AmbiguousClassification,
    /// A dependency cycle was found; `members` is the cycle path, starting
    /// at the node that closed it.
    CyclicDependency { members: Vec<String> },
    /// A reference points at a table/column/measure absent from the model.
    MissingMetadata,
    /// Nesting depth cap reached during scanning or traversal; output was
    /// truncated at the cap.
    RecursionLimitExceeded,
}

/// One recoverable finding, attached to the entity it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// The measure, table or visual the finding is about.
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }

    pub fn malformed(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::MalformedExpression, subject, message)
    }

    pub fn missing(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::MissingMetadata, subject, message)
    }
}
