//! Typed report-side snapshot: pages, visuals, slicers.

use super::reference::Reference;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub id: String,
    pub name: String,
    pub filters: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisualMeta {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub page_id: String,
    /// Columns bound to axes/categories/legends. Binding a column
    /// implicitly filters/groups by it, so these join the filter context.
    pub field_bindings: Vec<Reference>,
    pub filters: Vec<Reference>,
}

/// Where a slicer's selection applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlicerScope {
    /// Applies only to visuals on the slicer's own page.
    PageLocal,
    /// Applies to visuals on every listed page (the sync group's members).
    Synced(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlicerMeta {
    pub field: Reference,
    pub page_id: String,
    pub sync_group: Option<String>,
    pub scope: SlicerScope,
}

impl SlicerMeta {
    /// Does this slicer constrain visuals on `page_id`?
    pub fn applies_to_page(&self, page_id: &str) -> bool {
        match &self.scope {
            SlicerScope::PageLocal => self.page_id == page_id,
            SlicerScope::Synced(pages) => pages.iter().any(|p| p == page_id),
        }
    }
}

/// The complete report-side input for one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    /// Report-level filters apply to every visual.
    pub filters: Vec<Reference>,
    pub pages: Vec<PageMeta>,
    pub visuals: Vec<VisualMeta>,
    pub slicers: Vec<SlicerMeta>,
}

impl ReportSnapshot {
    pub fn page(&self, id: &str) -> Option<&PageMeta> {
        self.pages.iter().find(|p| p.id == id)
    }

    pub fn visuals_on_page<'a>(&'a self, page_id: &'a str) -> impl Iterator<Item = &'a VisualMeta> {
        self.visuals.iter().filter(move |v| v.page_id == page_id)
    }
}
