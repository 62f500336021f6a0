//! Directed dependency graph over tables, columns and measures, built from
//! extracted references. Cycles are data here, not errors.
pub mod builder;

pub use builder::{
    DependencyEdge, DependencyGraph, DependencyGraphSummary, DependencyNode, EdgeKind,
};
