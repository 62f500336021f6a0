//! Aggregation-table classification: five independent weighted heuristics
//! per table, an acceptance threshold, grain inference, and detail-ordered
//! level assignment.

use crate::analysis::diagnostics::{Diagnostic, DiagnosticKind};
use crate::model::{ModelSnapshot, RefScope, Reference, TableMeta};
use crate::scan;
use crate::scan::extract::MeasureCatalog;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Confidence at or above this accepts a candidate as an aggregation table.
pub const ACCEPTANCE_THRESHOLD: f64 = 0.5;

/// Assumed distinct values per grain column when no row count is supplied.
const DEFAULT_COLUMN_CARDINALITY: u64 = 100;

// Normalized heuristic weights; they sum to 1.0.
const W_NAME: f64 = 0.30;
const W_HIDDEN: f64 = 0.15;
const W_SUMMARIZE: f64 = 0.30;
const W_SUBSET: f64 = 0.15;
const W_DIM_KEYS: f64 = 0.10;

const NAME_PATTERNS: &[&str] = &["agg", "summary", "rollup"];
const SUMMARIZE_FUNCTIONS: &[&str] = &["SUMMARIZE", "SUMMARIZECOLUMNS", "GROUPBY"];

/// One classified (or candidate) aggregation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationTable {
    pub name: String,
    /// Ordinal detail level; the base fact table is 1, coarser tables get
    /// higher numbers. Re-aligned to authored routing levels when a
    /// routing measure is matched.
    pub inferred_level: i64,
    pub is_hidden: bool,
    /// Value-ordered and deduplicated.
    pub grain_columns: Vec<Reference>,
    pub confidence: f64,
    /// The fact table whose columns this table strictly subsets, if any.
    pub source_table: Option<String>,
    /// Rows this table is estimated to hold (supplied count or grain
    /// heuristic). Feeds the savings estimator; always an estimate.
    pub estimated_rows: u64,
}

/// Full classification output: accepted tables, below-threshold
/// candidates (never silently dropped), and the level→table map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub accepted: Vec<AggregationTable>,
    pub unclassified: Vec<AggregationTable>,
    /// The fact table routing's most-detailed level falls back to.
    pub base_table: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Classification {
    /// Maps each assigned detail level to its table, base table included.
    pub fn level_tables(&self) -> BTreeMap<i64, String> {
        let mut map = BTreeMap::new();
        if let Some(base) = &self.base_table {
            map.insert(1, base.clone());
        }
        for t in &self.accepted {
            map.insert(t.inferred_level, t.name.clone());
        }
        map
    }

    /// Re-keys assigned levels onto the authored level numbers a routing
    /// measure actually uses (ascending authored level = descending
    /// detail). Authored numbering is a convention, not a contract, so
    /// the mapping is positional.
    pub fn align_to_routing_levels(&mut self, authored_levels: &[i64]) -> BTreeMap<i64, String> {
        let mut sorted: Vec<i64> = authored_levels.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut map = BTreeMap::new();
        let mut it = sorted.into_iter();
        if let (Some(level), Some(base)) = (it.next(), &self.base_table) {
            map.insert(level, base.clone());
        }
        for t in &mut self.accepted {
            let Some(level) = it.next() else { break };
            t.inferred_level = level;
            map.insert(level, t.name.clone());
        }
        map
    }
}

/// Scores every table in the model. Tables scoring zero are neither
/// accepted nor candidates; everything in between is reported.
pub fn classify(model: &ModelSnapshot, catalog: &MeasureCatalog) -> Classification {
    let facts = model.fact_tables();
    let dim_keys: Vec<Reference> = model
        .dimension_tables()
        .iter()
        .flat_map(|t| {
            t.columns
                .iter()
                .filter(|c| c.is_key)
                .map(|c| Reference::column(t.name.clone(), c.name.clone()))
        })
        .collect();

    let mut diagnostics = Vec::new();
    let mut scored: Vec<AggregationTable> = Vec::new();
    for table in &model.tables {
        let (confidence, source_table) = score(table, &facts, &dim_keys);
        if confidence <= 0.0 {
            continue;
        }
        let grain_columns = infer_grain(table, &dim_keys, catalog, &mut diagnostics);
        let estimated_rows = estimate_grain_rows(model, &table.name, grain_columns.len());
        scored.push(AggregationTable {
            name: table.name.clone(),
            inferred_level: 0, // assigned below
            is_hidden: table.is_hidden,
            grain_columns,
            confidence,
            source_table,
            estimated_rows,
        });
    }

    let (mut accepted, unclassified): (Vec<_>, Vec<_>) = scored
        .into_iter()
        .partition(|t| t.confidence >= ACCEPTANCE_THRESHOLD);

    for t in &unclassified {
        diagnostics.push(Diagnostic::new(
            DiagnosticKind::AmbiguousClassification,
            t.name.clone(),
            format!(
                "confidence {:.2} is below the acceptance threshold {ACCEPTANCE_THRESHOLD}; \
                 reported as an unclassified candidate",
                t.confidence
            ),
        ));
    }

    // Level ordering: fewer grain columns means less detail and a higher
    // level number; ties go to the larger estimated grain cardinality
    // (more detail wins the lower level), then name for determinism.
    accepted.sort_by(|a, b| {
        b.grain_columns
            .len()
            .cmp(&a.grain_columns.len())
            .then(b.estimated_rows.cmp(&a.estimated_rows))
            .then(a.name.cmp(&b.name))
    });
    for (i, t) in accepted.iter_mut().enumerate() {
        t.inferred_level = i as i64 + 2; // base fact table is level 1
    }

    let base_table = pick_base_table(&facts, &accepted);

    Classification {
        accepted,
        unclassified,
        base_table,
        diagnostics,
    }
}

fn score(table: &TableMeta, facts: &[&TableMeta], dim_keys: &[Reference]) -> (f64, Option<String>) {
    let lower = table.name.to_ascii_lowercase();
    let name_hit = NAME_PATTERNS.iter().any(|p| lower.contains(p));

    let summarize_hit = table.defining_expression.as_deref().is_some_and(|expr| {
        let tokens = scan::tokenize(expr);
        SUMMARIZE_FUNCTIONS
            .iter()
            .any(|f| scan::scanner::find_call(&tokens, f).is_some())
    });

    // Strict column subset of some fact table (never of itself).
    let source_table = facts
        .iter()
        .filter(|f| f.name != table.name)
        .find(|f| {
            table.columns.len() < f.columns.len()
                && table.columns.iter().all(|c| f.has_column(&c.name))
        })
        .map(|f| f.name.clone());

    let dim_key_hit = table
        .columns
        .iter()
        .any(|c| dim_keys.iter().any(|k| k.name == c.name));

    let weight = |hit: bool, w: f64| if hit { w } else { 0.0 };
    let confidence = weight(name_hit, W_NAME)
        + weight(table.is_hidden, W_HIDDEN)
        + weight(summarize_hit, W_SUMMARIZE)
        + weight(source_table.is_some(), W_SUBSET)
        + weight(dim_key_hit, W_DIM_KEYS);
    (confidence, source_table)
}

/// Grain columns come from the defining expression when present, else
/// from the table's own columns intersected with dimension key names.
fn infer_grain(
    table: &TableMeta,
    dim_keys: &[Reference],
    catalog: &MeasureCatalog,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<Reference> {
    if let Some(expr) = &table.defining_expression {
        let tokens = scan::tokenize(expr);
        let extraction = scan::extract_references(&table.name, &tokens, catalog);
        diagnostics.extend(extraction.diagnostics);
        let columns: Vec<Reference> = extraction
            .references
            .into_iter()
            .filter(|r| r.scope == RefScope::Column)
            .collect();
        if !columns.is_empty() {
            return columns;
        }
    }
    table
        .columns
        .iter()
        .filter(|c| dim_keys.iter().any(|k| k.name == c.name))
        .map(|c| Reference::column(table.name.clone(), c.name.clone()))
        .collect()
}

/// Supplied row count wins; otherwise assume a fixed cardinality per
/// grain column, saturating. Crude, and labeled an estimate everywhere.
fn estimate_grain_rows(model: &ModelSnapshot, table: &str, grain_len: usize) -> u64 {
    if let Some(&rows) = model.row_counts.get(table) {
        return rows;
    }
    DEFAULT_COLUMN_CARDINALITY.saturating_pow(grain_len.min(u32::MAX as usize) as u32)
}

/// The base table is the fact table the accepted aggregations subset most
/// often; with no accepted tables, the first fact table by name.
fn pick_base_table(facts: &[&TableMeta], accepted: &[AggregationTable]) -> Option<String> {
    let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
    for t in accepted {
        if let Some(src) = &t.source_table {
            *votes.entry(src).or_default() += 1;
        }
    }
    votes
        .into_iter()
        .max_by_key(|&(_, n)| n)
        .map(|(name, _)| name.to_string())
        .or_else(|| facts.first().map(|f| f.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Cardinality, ColumnMeta, RelationshipMeta};
    use rstest::rstest;

    fn column(name: &str, is_key: bool) -> ColumnMeta {
        ColumnMeta { name: name.into(), is_key }
    }

    fn scenario_model() -> ModelSnapshot {
        ModelSnapshot {
            tables: vec![
                TableMeta {
                    name: "Sales".into(),
                    is_hidden: false,
                    defining_expression: None,
                    columns: vec![
                        column("ProductKey", false),
                        column("StoreKey", false),
                        column("YearQuarter", false),
                        column("Amount", false),
                    ],
                },
                TableMeta {
                    name: "Product".into(),
                    is_hidden: false,
                    defining_expression: None,
                    columns: vec![column("ProductKey", true), column("BrandName", false)],
                },
                TableMeta {
                    name: "Agg_Sales_YearQuarter".into(),
                    is_hidden: true,
                    defining_expression: Some(
                        "SUMMARIZECOLUMNS(Calendar[YearQuarter], \"Amt\", SUM(Sales[Amount]))".into(),
                    ),
                    columns: vec![column("YearQuarter", false), column("Amt", false)],
                },
                TableMeta {
                    name: "Calendar".into(),
                    is_hidden: false,
                    defining_expression: None,
                    columns: vec![column("YearQuarter", true), column("Year", false)],
                },
            ],
            measures: vec![],
            relationships: vec![
                RelationshipMeta {
                    from_table: "Sales".into(),
                    from_column: "ProductKey".into(),
                    to_table: "Product".into(),
                    to_column: "ProductKey".into(),
                    cardinality: Cardinality::ManyToOne,
                    is_active: true,
                },
                RelationshipMeta {
                    from_table: "Sales".into(),
                    from_column: "YearQuarter".into(),
                    to_table: "Calendar".into(),
                    to_column: "YearQuarter".into(),
                    cardinality: Cardinality::ManyToOne,
                    is_active: true,
                },
            ],
            row_counts: BTreeMap::new(),
        }
    }

    #[test]
    fn test_accepts_hidden_summarized_agg_table() {
        let model = scenario_model();
        let got = classify(&model, &MeasureCatalog::default());

        assert_eq!(got.accepted.len(), 1);
        let agg = &got.accepted[0];
        assert_eq!(agg.name, "Agg_Sales_YearQuarter");
        assert!(agg.confidence >= ACCEPTANCE_THRESHOLD);
        assert_eq!(agg.inferred_level, 2);
        assert_eq!(agg.grain_columns, vec![
            Reference::column("Calendar", "YearQuarter"),
            Reference::column("Sales", "Amount"),
        ]);
        assert_eq!(got.base_table.as_deref(), Some("Sales"));
    }

    #[test]
    fn test_below_threshold_candidates_are_reported_not_dropped() {
        let mut model = scenario_model();
        // A hidden helper table with nothing else going for it.
        model.tables.push(TableMeta {
            name: "Helper".into(),
            is_hidden: true,
            defining_expression: None,
            columns: vec![column("X", false)],
        });
        let got = classify(&model, &MeasureCatalog::default());
        assert!(got.unclassified.iter().any(|t| t.name == "Helper"));
        assert!(got
            .diagnostics
            .iter()
            .any(|d| matches!(d.kind, DiagnosticKind::AmbiguousClassification) && d.subject == "Helper"));
    }

    #[rstest]
    #[case("Agg_Sales", true)]
    #[case("SalesSummary", true)]
    #[case("Monthly_Rollup", true)]
    #[case("Product", false)]
    fn test_name_patterns(#[case] name: &str, #[case] expect_hit: bool) {
        let table = TableMeta {
            name: name.into(),
            is_hidden: false,
            defining_expression: None,
            columns: vec![],
        };
        let (confidence, _) = score(&table, &[], &[]);
        assert_eq!(confidence > 0.0, expect_hit);
    }

    #[test]
    fn test_level_ordering_fewer_grain_columns_is_higher_level() {
        let mut model = scenario_model();
        model.tables.push(TableMeta {
            name: "Agg_Sales_Year".into(),
            is_hidden: true,
            defining_expression: Some(
                "SUMMARIZE(Sales, Calendar[Year], Calendar[YearQuarter], Product[BrandName])".into(),
            ),
            columns: vec![column("YearQuarter", false), column("Year", false)],
        });
        let got = classify(&model, &MeasureCatalog::default());
        assert_eq!(got.accepted.len(), 2);
        // Three grain columns beats two: more detail, lower level.
        assert_eq!(got.accepted[0].name, "Agg_Sales_Year");
        assert_eq!(got.accepted[0].inferred_level, 2);
        assert_eq!(got.accepted[1].name, "Agg_Sales_YearQuarter");
        assert_eq!(got.accepted[1].inferred_level, 3);
    }

    #[test]
    fn test_align_to_routing_levels_is_positional() {
        let model = scenario_model();
        let mut got = classify(&model, &MeasureCatalog::default());
        // Routing authored levels 1 and 3, skipping 2.
        let map = got.align_to_routing_levels(&[1, 3]);
        assert_eq!(map.get(&1).map(String::as_str), Some("Sales"));
        assert_eq!(map.get(&3).map(String::as_str), Some("Agg_Sales_YearQuarter"));
        assert_eq!(got.accepted[0].inferred_level, 3);
    }

    #[test]
    fn test_supplied_row_counts_override_grain_heuristic() {
        let mut model = scenario_model();
        model.row_counts.insert("Agg_Sales_YearQuarter".into(), 40);
        let got = classify(&model, &MeasureCatalog::default());
        assert_eq!(got.accepted[0].estimated_rows, 40);
    }
}
