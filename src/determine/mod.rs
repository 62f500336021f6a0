//! Level determination: a pure function from one filter context and an
//! ordered rule list to a chosen level with a reasoning trace. Stateless
//! and referentially transparent, so per-visual evaluation parallelizes
//! without locks.

use crate::context::FilterContext;
use crate::model::Reference;
use crate::scan::RoutingRule;
use serde::{Deserialize, Serialize};

/// Level reported when no routing rules were recognized at all.
pub const BASE_LEVEL: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelDetermination {
    pub visual_id: String,
    pub level: i64,
    pub table_name: String,
    pub matched_rule: Option<RoutingRule>,
    pub matched_column: Option<Reference>,
    pub reasoning: String,
}

/// Evaluates rules strictly in `source_order`: the first rule whose
/// trigger set intersects the context wins and evaluation stops. With no
/// match the default rule is chosen; with no rules at all the base level
/// is assumed.
pub fn determine_level(context: &FilterContext, rules: &[RoutingRule]) -> LevelDetermination {
    debug_assert!(rules.windows(2).all(|w| w[0].source_order < w[1].source_order));

    for rule in rules.iter().filter(|r| !r.is_default) {
        // Trigger sets are value-ordered, so the first intersecting
        // column is deterministic across runs.
        if let Some(column) = rule.trigger_columns.iter().find(|c| context.contains(c)) {
            let via = context
                .provenance_of(column)
                .unwrap_or("unknown source")
                .to_string();
            return LevelDetermination {
                visual_id: context.visual_id.clone(),
                level: rule.level,
                table_name: rule.table_name.clone(),
                matched_rule: Some(rule.clone()),
                matched_column: Some(column.clone()),
                reasoning: format!(
                    "trigger column {column} is in the filter context (via {via}); \
                     rule {} selects level {} ({})",
                    rule.source_order, rule.level, display_table(&rule.table_name)
                ),
            };
        }
    }

    if let Some(default) = rules.iter().find(|r| r.is_default) {
        return LevelDetermination {
            visual_id: context.visual_id.clone(),
            level: default.level,
            table_name: default.table_name.clone(),
            matched_rule: Some(default.clone()),
            matched_column: None,
            reasoning: "no trigger columns present; used default".into(),
        };
    }

    LevelDetermination {
        visual_id: context.visual_id.clone(),
        level: BASE_LEVEL,
        table_name: String::new(),
        matched_rule: None,
        matched_column: None,
        reasoning: "no routing rules recognized; assumed base level".into(),
    }
}

fn display_table(name: &str) -> &str {
    if name.is_empty() {
        "unresolved table"
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FilterContext, FilterSource, SourceScope};
    use std::collections::BTreeSet;

    fn rule(order: usize, level: i64, table: &str, triggers: &[Reference]) -> RoutingRule {
        RoutingRule {
            trigger_columns: triggers.iter().cloned().collect::<BTreeSet<_>>(),
            level,
            table_name: table.into(),
            source_order: order,
            is_default: false,
        }
    }

    fn default_rule(order: usize, level: i64, table: &str) -> RoutingRule {
        RoutingRule {
            trigger_columns: BTreeSet::new(),
            level,
            table_name: table.into(),
            source_order: order,
            is_default: true,
        }
    }

    fn context(columns: &[Reference]) -> FilterContext {
        FilterContext::from_sources(
            "v1",
            &[FilterSource {
                scope: SourceScope::Binding,
                columns: columns.to_vec(),
                provenance: "test".into(),
            }],
        )
    }

    fn sample_rules() -> Vec<RoutingRule> {
        vec![
            rule(0, 1, "Sales", &[
                Reference::column("Product", "BrandName"),
                Reference::column("Stores", "StoreName"),
            ]),
            rule(1, 2, "Agg_Sales_Month", &[Reference::column("Calendar", "Month")]),
            default_rule(2, 3, "Agg_Sales_YearQuarter"),
        ]
    }

    #[test]
    fn test_first_matching_rule_short_circuits() {
        // Context intersects both rule 0 and rule 1; declaration order wins.
        let ctx = context(&[
            Reference::column("Calendar", "Month"),
            Reference::column("Product", "BrandName"),
        ]);
        let got = determine_level(&ctx, &sample_rules());
        assert_eq!(got.level, 1);
        assert_eq!(got.table_name, "Sales");
        assert_eq!(
            got.matched_column,
            Some(Reference::column("Product", "BrandName"))
        );
    }

    #[test]
    fn test_unrelated_columns_do_not_mask_a_match() {
        let ctx = context(&[
            Reference::column("Geo", "Country"),
            Reference::column("Stores", "StoreName"),
        ]);
        let got = determine_level(&ctx, &sample_rules());
        assert_eq!(got.level, 1);
    }

    #[test]
    fn test_no_trigger_columns_falls_back_to_default() {
        let ctx = context(&[Reference::column("Calendar", "Year")]);
        let got = determine_level(&ctx, &sample_rules());
        assert_eq!(got.level, 3);
        assert_eq!(got.table_name, "Agg_Sales_YearQuarter");
        assert_eq!(got.reasoning, "no trigger columns present; used default");
        assert!(got.matched_column.is_none());
    }

    #[test]
    fn test_empty_rule_list_assumes_base_level() {
        let ctx = context(&[Reference::column("Calendar", "Year")]);
        let got = determine_level(&ctx, &[]);
        assert_eq!(got.level, BASE_LEVEL);
        assert!(got.matched_rule.is_none());
    }

    #[test]
    fn test_referential_transparency() {
        let ctx = context(&[Reference::column("Calendar", "Month")]);
        let rules = sample_rules();
        assert_eq!(determine_level(&ctx, &rules), determine_level(&ctx, &rules));
    }
}
