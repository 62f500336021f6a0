//! Savings estimation: rows avoided by hitting an aggregation table
//! instead of the full-detail table, per visual, folded per page and per
//! report. Everything here is an estimate and says so.

use crate::classify::AggregationTable;
use crate::determine::LevelDetermination;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavingsScope {
    Visual,
    Page,
    Report,
}

/// Estimated rows saved at one scope. Invariant: `rows_saved >= 0` holds
/// by construction (saturating subtraction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsEstimate {
    pub scope: SavingsScope,
    /// Visual id, page id, or the report name.
    pub subject: String,
    pub base_rows: u64,
    pub chosen_rows: u64,
    pub rows_saved: u64,
    /// Fraction in `[0, 1]`; zero when `base_rows` is zero.
    pub percent_saved: f64,
}

impl SavingsEstimate {
    fn new(scope: SavingsScope, subject: String, base_rows: u64, chosen_rows: u64) -> Self {
        let rows_saved = base_rows.saturating_sub(chosen_rows);
        let percent_saved = if base_rows == 0 {
            0.0
        } else {
            rows_saved as f64 / base_rows as f64
        };
        Self {
            scope,
            subject,
            base_rows,
            chosen_rows,
            rows_saved,
            percent_saved,
        }
    }
}

/// How many visuals landed on each level, at page or report scope.
pub type LevelDistribution = BTreeMap<i64, usize>;

/// Estimates one visual's savings. The chosen table's rows come from the
/// matched aggregation table's estimate (supplied count or grain
/// heuristic); a determination that stayed on the base table, or whose
/// table is unknown, saves nothing.
pub fn estimate_visual(
    determination: &LevelDetermination,
    base_table: Option<&str>,
    base_rows: u64,
    aggregations: &[AggregationTable],
) -> SavingsEstimate {
    let on_base = base_table == Some(determination.table_name.as_str());
    let chosen_rows = if on_base || determination.table_name.is_empty() {
        base_rows
    } else {
        aggregations
            .iter()
            .find(|a| a.name == determination.table_name)
            .map(|a| a.estimated_rows.min(base_rows))
            .unwrap_or(base_rows)
    };
    SavingsEstimate::new(
        SavingsScope::Visual,
        determination.visual_id.clone(),
        base_rows,
        chosen_rows,
    )
}

/// Sums row figures across estimates and recomputes the percentage.
pub fn fold(scope: SavingsScope, subject: impl Into<String>, parts: &[&SavingsEstimate]) -> SavingsEstimate {
    let base: u64 = parts.iter().map(|e| e.base_rows).sum();
    let chosen: u64 = parts.iter().map(|e| e.chosen_rows).sum();
    SavingsEstimate::new(scope, subject.into(), base, chosen)
}

pub fn distribution<'a>(
    determinations: impl Iterator<Item = &'a LevelDetermination>,
) -> LevelDistribution {
    let mut counts = LevelDistribution::new();
    for d in determinations {
        *counts.entry(d.level).or_default() += 1;
    }
    counts
}
