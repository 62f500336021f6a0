//! Filter-context resolution: for one visual, the union of every filter
//! source that touches it. Union, not override — rule evaluation only
//! tests column presence. Provenance is retained per column purely for
//! the human-readable reasoning string.

use crate::model::{Reference, ReportSnapshot, VisualMeta};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Which kind of source contributed a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceScope {
    Report,
    Page,
    Visual,
    Slicer,
    /// Axis/category/legend bindings; binding a column implicitly
    /// filters/groups by it.
    Binding,
}

impl SourceScope {
    pub fn label(self) -> &'static str {
        match self {
            SourceScope::Report => "report filter",
            SourceScope::Page => "page filter",
            SourceScope::Visual => "visual filter",
            SourceScope::Slicer => "slicer",
            SourceScope::Binding => "field binding",
        }
    }
}

/// One filter source feeding a visual's context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSource {
    pub scope: SourceScope,
    pub columns: Vec<Reference>,
    /// Human-readable origin, e.g. the page name or sync-group id.
    pub provenance: String,
}

/// The effective column set for one visual. Membership is keyed by
/// `(table, name)`; provenance never affects membership.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterContext {
    pub visual_id: String,
    columns: BTreeMap<(String, String), SmallVec<[String; 2]>>,
}

impl FilterContext {
    /// Unions all sources. Each contributing source is appended to the
    /// column's provenance list in source order, first contributor first.
    pub fn from_sources(visual_id: impl Into<String>, sources: &[FilterSource]) -> Self {
        let mut columns: BTreeMap<(String, String), SmallVec<[String; 2]>> = BTreeMap::new();
        for source in sources {
            for column in &source.columns {
                columns
                    .entry((column.table.clone(), column.name.clone()))
                    .or_default()
                    .push(format!("{} ({})", source.scope.label(), source.provenance));
            }
        }
        Self {
            visual_id: visual_id.into(),
            columns,
        }
    }

    pub fn contains(&self, column: &Reference) -> bool {
        self.columns
            .contains_key(&(column.table.clone(), column.name.clone()))
    }

    /// First contributor of a column, for reasoning strings.
    pub fn provenance_of(&self, column: &Reference) -> Option<&str> {
        self.columns
            .get(&(column.table.clone(), column.name.clone()))
            .and_then(|p| p.first())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }
}

/// Gathers the filter sources applying to one visual: report filters, the
/// containing page's filters, the visual's own filters, in-scope slicers,
/// then field bindings.
pub fn sources_for(visual: &VisualMeta, report: &ReportSnapshot) -> Vec<FilterSource> {
    let mut sources = Vec::new();
    if !report.filters.is_empty() {
        sources.push(FilterSource {
            scope: SourceScope::Report,
            columns: report.filters.clone(),
            provenance: "report".into(),
        });
    }
    if let Some(page) = report.page(&visual.page_id) {
        if !page.filters.is_empty() {
            sources.push(FilterSource {
                scope: SourceScope::Page,
                columns: page.filters.clone(),
                provenance: page.name.clone(),
            });
        }
    }
    if !visual.filters.is_empty() {
        sources.push(FilterSource {
            scope: SourceScope::Visual,
            columns: visual.filters.clone(),
            provenance: visual.title.clone(),
        });
    }
    for slicer in &report.slicers {
        if slicer.applies_to_page(&visual.page_id) {
            sources.push(FilterSource {
                scope: SourceScope::Slicer,
                columns: vec![slicer.field.clone()],
                provenance: slicer
                    .sync_group
                    .clone()
                    .unwrap_or_else(|| format!("page {}", slicer.page_id)),
            });
        }
    }
    if !visual.field_bindings.is_empty() {
        sources.push(FilterSource {
            scope: SourceScope::Binding,
            columns: visual.field_bindings.clone(),
            provenance: visual.title.clone(),
        });
    }
    sources
}

/// Convenience: gather and union in one step.
pub fn resolve(visual: &VisualMeta, report: &ReportSnapshot) -> FilterContext {
    FilterContext::from_sources(visual.id.clone(), &sources_for(visual, report))
}
