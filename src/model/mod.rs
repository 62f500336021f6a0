//! Immutable typed snapshots of the model and report metadata consumed by
//! one analysis run.
pub mod reference;
pub mod report;
pub mod tables;

pub use reference::{RefScope, Reference};
pub use report::{PageMeta, ReportSnapshot, SlicerMeta, SlicerScope, VisualMeta};
pub use tables::{Cardinality, ColumnMeta, MeasureMeta, ModelSnapshot, RelationshipMeta, TableMeta};
