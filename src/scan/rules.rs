//! Routing-rule extraction: recognizes the one expression shape the engine
//! understands — named boolean variables that are disjunctions of
//! `ISFILTERED`-style column tests, feeding a `SWITCH(TRUE(), …)` branch
//! selector whose branches return level numbers, with a trailing default.
//!
//! Partial matches degrade to diagnostics; nothing in here aborts the run.

use super::scanner::{self, Token, MAX_NESTING_DEPTH};
use crate::analysis::diagnostics::Diagnostic;
use crate::model::Reference;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One recovered routing rule. `source_order` is strict priority: lower is
/// evaluated first and maps to a more detailed level. Exactly one rule per
/// set carries `is_default` with an empty trigger set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub trigger_columns: BTreeSet<Reference>,
    pub level: i64,
    /// Filled by `resolve_tables` once classification has produced a
    /// level→table mapping; empty until then.
    pub table_name: String,
    pub source_order: usize,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RuleExtraction {
    pub rules: Vec<RoutingRule>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RuleExtraction {
    fn malformed(subject: &str, message: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            diagnostics: vec![Diagnostic::malformed(subject, message)],
        }
    }
}

/// Recognizes the routing shape in one measure expression.
///
/// Absence of the shape yields an empty rule list plus a
/// `MalformedExpression` diagnostic, never an error. Individual garbled
/// variables or branches are skipped with diagnostics while the rest of
/// the expression is still extracted.
pub fn extract_routing_rules(subject: &str, tokens: &[Token]) -> RuleExtraction {
    let mut diagnostics = Vec::new();
    let (bindings, return_expr) = split_var_bindings(subject, tokens, &mut diagnostics);

    // Resolve each VAR to a trigger set. A variable with zero recognized
    // predicates is recorded but is not a trigger set.
    let mut trigger_sets: BTreeMap<String, Option<BTreeSet<Reference>>> = BTreeMap::new();
    for (name, expr) in &bindings {
        let set = parse_disjunction(subject, expr, 0, &mut diagnostics);
        if set.is_empty() {
            diagnostics.push(Diagnostic::malformed(
                subject,
                format!("variable '{name}' contains no recognizable filter-test predicates"),
            ));
            trigger_sets.insert(name.to_ascii_lowercase(), None);
        } else {
            trigger_sets.insert(name.to_ascii_lowercase(), Some(set));
        }
    }

    let Some(switch) = scanner::find_call(return_expr, "SWITCH") else {
        let mut out = RuleExtraction::malformed(subject, "no SWITCH branch selector found");
        out.diagnostics.splice(0..0, diagnostics);
        return out;
    };
    if switch.args.is_empty() || !is_true_call(switch.args[0]) {
        let mut out =
            RuleExtraction::malformed(subject, "SWITCH selector does not start with TRUE()");
        out.diagnostics.splice(0..0, diagnostics);
        return out;
    }

    let branches = &switch.args[1..];
    if branches.len() < 3 || branches.len() % 2 == 0 {
        let mut out = RuleExtraction::malformed(
            subject,
            "SWITCH needs condition/level pairs plus a trailing default level",
        );
        out.diagnostics.splice(0..0, diagnostics);
        return out;
    }

    // The trailing default must be a plain level number; a garbled default
    // leaves no safe fallback, so the whole shape is rejected.
    let Some(default_level) = integer_literal(branches[branches.len() - 1]) else {
        let mut out =
            RuleExtraction::malformed(subject, "trailing default branch is not a level number");
        out.diagnostics.splice(0..0, diagnostics);
        return out;
    };

    let mut rules = Vec::new();
    for pair in branches[..branches.len() - 1].chunks(2) {
        let (cond, value) = (pair[0], pair[1]);
        let Some(level) = integer_literal(value) else {
            diagnostics.push(Diagnostic::malformed(
                subject,
                "branch value is not a level number; branch skipped",
            ));
            continue;
        };
        let triggers = match cond {
            [Token::Ident(name)] => match trigger_sets.get(&name.to_ascii_lowercase()) {
                Some(Some(set)) => set.clone(),
                Some(None) => continue, // already diagnosed above
                None => {
                    diagnostics.push(Diagnostic::malformed(
                        subject,
                        format!("branch condition '{name}' is not a bound variable; branch skipped"),
                    ));
                    continue;
                }
            },
            _ => {
                let set = parse_disjunction(subject, cond, 0, &mut diagnostics);
                if set.is_empty() {
                    diagnostics.push(Diagnostic::malformed(
                        subject,
                        "branch condition has no recognizable predicates; branch skipped",
                    ));
                    continue;
                }
                set
            }
        };
        rules.push(RoutingRule {
            trigger_columns: triggers,
            level,
            table_name: String::new(),
            source_order: rules.len(),
            is_default: false,
        });
    }

    rules.push(RoutingRule {
        trigger_columns: BTreeSet::new(),
        level: default_level,
        table_name: String::new(),
        source_order: rules.len(),
        is_default: true,
    });

    RuleExtraction { rules, diagnostics }
}

/// Fills `table_name` on each rule from the level→table map produced by
/// classification. Unmapped levels stay empty with a diagnostic.
pub fn resolve_tables(
    rules: &mut [RoutingRule],
    level_tables: &BTreeMap<i64, String>,
    subject: &str,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for rule in rules.iter_mut() {
        match level_tables.get(&rule.level) {
            Some(table) => rule.table_name = table.clone(),
            None => diagnostics.push(Diagnostic::missing(
                subject,
                format!("no table is known for routing level {}", rule.level),
            )),
        }
    }
    diagnostics
}

/// Splits leading `VAR name = expr` bindings from the `RETURN` body. With
/// no bindings the whole token stream is the return expression.
fn split_var_bindings<'a>(
    subject: &str,
    tokens: &'a [Token],
    diagnostics: &mut Vec<Diagnostic>,
) -> (Vec<(String, &'a [Token])>, &'a [Token]) {
    // Statement keywords only count at the current nesting depth.
    let mut boundaries = Vec::new();
    let mut depth = 0usize;
    for (i, tok) in tokens.iter().enumerate() {
        match tok {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            t if depth == 0 && (t.is_ident("VAR") || t.is_ident("RETURN")) => boundaries.push(i),
            _ => {}
        }
    }
    if boundaries.is_empty() {
        return (Vec::new(), tokens);
    }

    let mut bindings = Vec::new();
    let mut return_expr: &[Token] = &[];
    for (n, &start) in boundaries.iter().enumerate() {
        let end = boundaries.get(n + 1).copied().unwrap_or(tokens.len());
        let body = &tokens[start + 1..end];
        if tokens[start].is_ident("RETURN") {
            return_expr = body;
            break;
        }
        match body {
            [Token::Ident(name), Token::Eq, expr @ ..] if !expr.is_empty() => {
                bindings.push((name.clone(), expr));
            }
            _ => diagnostics.push(Diagnostic::malformed(
                subject,
                "VAR binding is not 'VAR name = expression'; binding skipped",
            )),
        }
    }
    (bindings, return_expr)
}

/// Extracts the trigger columns of a disjunction: `ISFILTERED(col)`-style
/// terms joined by top-level `||`, `OR(…)` calls, or parenthesized groups
/// of the same. Unrecognized terms are skipped; the caller decides whether
/// an empty result is a soft failure.
fn parse_disjunction(
    subject: &str,
    tokens: &[Token],
    depth: usize,
    diagnostics: &mut Vec<Diagnostic>,
) -> BTreeSet<Reference> {
    let mut set = BTreeSet::new();
    if depth > MAX_NESTING_DEPTH {
        diagnostics.push(scanner::depth_cap_diagnostic(subject));
        return set;
    }
    for part in scanner::split_top_level(tokens, |t| matches!(t, Token::OrOp)) {
        match part {
            [] => {}
            // Parenthesized group around a nested disjunction.
            [Token::LParen, ..] if scanner::matching_paren(part, 0) == Some(part.len() - 1) => {
                set.extend(parse_disjunction(
                    subject,
                    &part[1..part.len() - 1],
                    depth + 1,
                    diagnostics,
                ));
            }
            _ => {
                if let Some(call) = scanner::call_at(part, 0) {
                    if call.close == part.len() - 1 {
                        if is_filter_test(call.name) {
                            if let Some(column) = single_column_ref(&call.args) {
                                set.insert(column);
                                continue;
                            }
                        } else if call.name.eq_ignore_ascii_case("OR") {
                            for arg in &call.args {
                                set.extend(parse_disjunction(subject, arg, depth + 1, diagnostics));
                            }
                            continue;
                        }
                    }
                }
                // Not a recognizable predicate; leave it to the caller's
                // zero-predicate check.
            }
        }
    }
    set
}

fn is_filter_test(name: &str) -> bool {
    name.eq_ignore_ascii_case("ISFILTERED") || name.eq_ignore_ascii_case("ISCROSSFILTERED")
}

fn single_column_ref(args: &[&[Token]]) -> Option<Reference> {
    match args {
        [[Token::Ident(table) | Token::Quoted(table), Token::Bracket(column)]] => {
            Some(Reference::column(table.as_str(), column.as_str()))
        }
        _ => None,
    }
}

fn is_true_call(tokens: &[Token]) -> bool {
    matches!(
        scanner::call_at(tokens, 0),
        Some(call) if call.name.eq_ignore_ascii_case("TRUE") && call.args.is_empty()
    )
}

fn integer_literal(tokens: &[Token]) -> Option<i64> {
    match tokens {
        [Token::Number(n)] if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::diagnostics::DiagnosticKind;
    use crate::scan::scanner::tokenize;

    const ROUTING: &str = "\
        VAR FilterDetail = ISFILTERED(Product[BrandName]) || ISFILTERED(Stores[StoreName])\n\
        VAR FilterMonth = ISFILTERED('Calendar'[Month])\n\
        RETURN SWITCH(TRUE(), FilterDetail, 1, FilterMonth, 2, 3)";

    #[test]
    fn test_extracts_rules_in_source_order() {
        let got = extract_routing_rules("m", &tokenize(ROUTING));
        assert!(got.diagnostics.is_empty());
        assert_eq!(got.rules.len(), 3);

        assert_eq!(got.rules[0].level, 1);
        assert_eq!(got.rules[0].source_order, 0);
        assert_eq!(got.rules[0].trigger_columns.len(), 2);
        assert!(got.rules[0]
            .trigger_columns
            .contains(&Reference::column("Product", "BrandName")));

        assert_eq!(got.rules[1].level, 2);
        assert!(got.rules[1]
            .trigger_columns
            .contains(&Reference::column("Calendar", "Month")));

        let default = &got.rules[2];
        assert!(default.is_default);
        assert_eq!(default.level, 3);
        assert!(default.trigger_columns.is_empty());
        assert_eq!(default.source_order, 2);
    }

    #[test]
    fn test_inline_conditions_and_or_call() {
        let expr = "SWITCH(TRUE(), OR(ISFILTERED(A[X]), ISFILTERED(B[Y])), 1, 9)";
        let got = extract_routing_rules("m", &tokenize(expr));
        assert_eq!(got.rules.len(), 2);
        assert_eq!(got.rules[0].trigger_columns.len(), 2);
        assert!(got.rules[1].is_default);
    }

    #[test]
    fn test_garbled_expression_yields_empty_rules_and_diagnostic() {
        let got = extract_routing_rules("m", &tokenize("SUM(Sales[Amount]) * 2"));
        assert!(got.rules.is_empty());
        assert!(got
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::MalformedExpression));
    }

    #[test]
    fn test_unrecognized_variable_is_soft_failure() {
        // FilterBad has no filter tests; its branch is dropped but the
        // rest of the rules survive.
        let expr = "\
            VAR FilterBad = 1 + 2\n\
            VAR FilterGood = ISFILTERED(A[X])\n\
            RETURN SWITCH(TRUE(), FilterBad, 1, FilterGood, 2, 9)";
        let got = extract_routing_rules("m", &tokenize(expr));
        assert_eq!(got.rules.len(), 2);
        assert_eq!(got.rules[0].level, 2);
        assert!(got.rules[1].is_default);
        assert!(got
            .diagnostics
            .iter()
            .any(|d| d.message.contains("FilterBad")));
    }

    #[test]
    fn test_missing_default_is_malformed() {
        let expr = "SWITCH(TRUE(), ISFILTERED(A[X]), 1, ISFILTERED(B[Y]), 2)";
        let got = extract_routing_rules("m", &tokenize(expr));
        assert!(got.rules.is_empty());
        assert_eq!(got.diagnostics.len(), 1);
    }

    #[test]
    fn test_switch_without_true_selector_is_malformed() {
        let got =
            extract_routing_rules("m", &tokenize("SWITCH(Sales[Amount], 1, 2, 3)"));
        assert!(got.rules.is_empty());
    }

    #[test]
    fn test_resolve_tables_fills_names_and_flags_gaps() {
        let mut got = extract_routing_rules("m", &tokenize(ROUTING));
        let map = BTreeMap::from([(1, "Sales".to_string()), (3, "Agg_Sales".to_string())]);
        let diags = resolve_tables(&mut got.rules, &map, "m");
        assert_eq!(got.rules[0].table_name, "Sales");
        assert_eq!(got.rules[2].table_name, "Agg_Sales");
        // Level 2 has no table; flagged, not fatal.
        assert_eq!(got.rules[1].table_name, "");
        assert_eq!(diags.len(), 1);
        assert!(matches!(diags[0].kind, DiagnosticKind::MissingMetadata));
    }
}
