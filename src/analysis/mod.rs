//! One analysis run end to end: orchestration, diagnostics, report types.
pub mod diagnostics;
pub mod run;

pub use diagnostics::{AnalysisError, Diagnostic, DiagnosticKind};
pub use run::{analyze, AnalysisReport, MeasureComplexity, MeasureRules, PageSavings};
