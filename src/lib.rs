//! Aggregation-routing analysis for tabular models.
//!
//! Given an immutable snapshot of a model (tables, measures,
//! relationships) and a report (pages, visuals, slicers), the engine
//! determines, per visual, which table a query would actually hit, why,
//! and how many rows that choice saves versus always querying the
//! full-detail table. Routing rules are recovered from the text of a
//! level-selection measure; nothing here talks to a live data engine,
//! and every figure produced is an estimate.
//!
//! Entry point: [`analysis::run::analyze`].

pub mod analysis;
pub mod classify;
pub mod context;
pub mod determine;
pub mod graph;
pub mod model;
pub mod savings;
pub mod scan;

pub use analysis::{analyze, AnalysisError, AnalysisReport, Diagnostic, DiagnosticKind};
pub use classify::AggregationTable;
pub use context::{FilterContext, FilterSource};
pub use determine::{determine_level, LevelDetermination};
pub use graph::{DependencyGraph, DependencyNode};
pub use model::{ModelSnapshot, Reference, ReportSnapshot};
pub use savings::SavingsEstimate;
pub use scan::RoutingRule;
