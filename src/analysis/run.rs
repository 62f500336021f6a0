//! The orchestrator for one analysis run. All inputs are immutable
//! snapshots; every entity built here is discarded with the run. Single
//! measures or tables failing never abort the run — the result is always
//! complete, with partial findings clearly flagged in the diagnostics.

use crate::analysis::diagnostics::{AnalysisError, Diagnostic};
use crate::classify::{self, AggregationTable};
use crate::context;
use crate::determine::{self, LevelDetermination};
use crate::graph::{DependencyGraph, DependencyGraphSummary};
use crate::model::{ModelSnapshot, ReportSnapshot};
use crate::savings::{self, LevelDistribution, SavingsEstimate, SavingsScope};
use crate::scan::extract::{build_parse_cache, MeasureCatalog};
use crate::scan::{self, RoutingRule};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A measure whose expression matched the routing shape, with its rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureRules {
    pub table: String,
    pub name: String,
    pub rules: Vec<RoutingRule>,
}

/// Reporting-only complexity score for one measure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureComplexity {
    pub table: String,
    pub name: String,
    pub complexity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSavings {
    pub page_id: String,
    pub estimate: SavingsEstimate,
    pub levels: LevelDistribution,
}

/// Everything one run produces. Plain values throughout; serialization to
/// any document format is a collaborator's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub aggregation_tables: Vec<AggregationTable>,
    pub unclassified: Vec<AggregationTable>,
    pub base_table: Option<String>,
    /// Every measure that matched the routing shape, in (table, name)
    /// order; the first non-empty set is the active one.
    pub routing: Vec<MeasureRules>,
    /// The active rule set with table names resolved.
    pub active_rules: Vec<RoutingRule>,
    pub graph: DependencyGraphSummary,
    pub complexity: Vec<MeasureComplexity>,
    /// One determination per visual, ordered by visual id.
    pub determinations: Vec<LevelDetermination>,
    pub visual_savings: Vec<SavingsEstimate>,
    pub page_savings: Vec<PageSavings>,
    pub report_savings: SavingsEstimate,
    pub report_levels: LevelDistribution,
    pub diagnostics: Vec<Diagnostic>,
}

/// Runs the whole analysis against one model/report snapshot pair.
///
/// The only hard failure is a missing model; everything else lands in
/// `AnalysisReport::diagnostics`.
pub fn analyze(
    model: &ModelSnapshot,
    report: &ReportSnapshot,
) -> Result<AnalysisReport, AnalysisError> {
    model.validate()?;
    let mut diagnostics = Vec::new();

    // Parse every measure exactly once, single-threaded, before any
    // parallel consumption. The cache is read-only from here on.
    let catalog = MeasureCatalog::new(&model.measures);
    let cache = build_parse_cache(&model.measures, &catalog);
    for extraction in cache.values() {
        diagnostics.extend(extraction.diagnostics.iter().cloned());
    }
    let complexity: Vec<MeasureComplexity> = cache
        .iter()
        .map(|((table, name), e)| MeasureComplexity {
            table: table.clone(),
            name: name.clone(),
            complexity: e.complexity(),
        })
        .collect();

    let graph = DependencyGraph::build(model, &catalog, &cache);
    diagnostics.extend(graph.diagnostics.iter().cloned());

    let mut classification = classify::classify(model, &catalog);
    diagnostics.append(&mut classification.diagnostics);

    let (routing, mut active_rules) =
        extract_routing(model, &mut classification, &mut diagnostics);

    // Per-visual determination is pure, so fan out without locks and
    // re-impose a deterministic order afterwards.
    let mut determinations: Vec<LevelDetermination> = report
        .visuals
        .par_iter()
        .map(|visual| {
            let ctx = context::resolve(visual, report);
            determine::determine_level(&ctx, &active_rules)
        })
        .collect();
    determinations.sort_by(|a, b| a.visual_id.cmp(&b.visual_id));

    let base_rows = base_row_count(model, &classification, &mut diagnostics);
    let visual_savings: Vec<SavingsEstimate> = determinations
        .iter()
        .map(|d| {
            savings::estimate_visual(
                d,
                classification.base_table.as_deref(),
                base_rows,
                &classification.accepted,
            )
        })
        .collect();

    let page_savings = fold_pages(report, &determinations, &visual_savings);
    let report_savings = savings::fold(
        SavingsScope::Report,
        "report",
        &visual_savings.iter().collect::<Vec<_>>(),
    );
    let report_levels = savings::distribution(determinations.iter());

    // Rules are shared verbatim between `routing` and the resolved active
    // set; keep the resolved copy sorted by priority for readers.
    active_rules.sort_by_key(|r| r.source_order);

    Ok(AnalysisReport {
        aggregation_tables: classification.accepted,
        unclassified: classification.unclassified,
        base_table: classification.base_table,
        routing,
        active_rules,
        graph: graph.summary(),
        complexity,
        determinations,
        visual_savings,
        page_savings,
        report_savings,
        report_levels,
        diagnostics,
    })
}

/// Probes every routing-candidate measure for the recognized shape. The
/// active set is the first non-empty one in (table, name) order; its
/// authored levels are aligned onto the classification and resolved to
/// table names.
fn extract_routing(
    model: &ModelSnapshot,
    classification: &mut classify::Classification,
    diagnostics: &mut Vec<Diagnostic>,
) -> (Vec<MeasureRules>, Vec<RoutingRule>) {
    let mut measures: Vec<_> = model.measures.iter().collect();
    measures.sort_by(|a, b| (&a.table, &a.name).cmp(&(&b.table, &b.name)));

    let mut routing = Vec::new();
    for m in measures {
        let tokens = scan::tokenize(&m.expression);
        let is_candidate = tokens.iter().any(|t| t.is_ident("SWITCH"))
            && tokens
                .iter()
                .any(|t| t.is_ident("ISFILTERED") || t.is_ident("ISCROSSFILTERED"));
        if !is_candidate {
            continue;
        }
        let subject = format!("{}[{}]", m.table, m.name);
        let mut extraction = scan::extract_routing_rules(&subject, &tokens);
        diagnostics.append(&mut extraction.diagnostics);
        if !extraction.rules.is_empty() {
            routing.push(MeasureRules {
                table: m.table.clone(),
                name: m.name.clone(),
                rules: extraction.rules,
            });
        }
    }

    let Some(active) = routing.first() else {
        diagnostics.push(Diagnostic::malformed(
            "model",
            "no level-selection measure with a recognizable routing shape was found; \
             all visuals fall back to the base level",
        ));
        return (routing, Vec::new());
    };

    let mut rules = active.rules.clone();
    let subject = format!("{}[{}]", active.table, active.name);
    let authored: Vec<i64> = rules.iter().map(|r| r.level).collect();
    let level_tables = classification.align_to_routing_levels(&authored);
    diagnostics.extend(scan::resolve_tables(&mut rules, &level_tables, &subject));
    (routing, rules)
}

/// Base-table rows: supplied count, or zero with a diagnostic (zero rows
/// means every savings figure reports zero rather than guessing).
fn base_row_count(
    model: &ModelSnapshot,
    classification: &classify::Classification,
    diagnostics: &mut Vec<Diagnostic>,
) -> u64 {
    let Some(base) = &classification.base_table else {
        return 0;
    };
    match model.row_counts.get(base) {
        Some(&rows) => rows,
        None => {
            diagnostics.push(Diagnostic::missing(
                base.clone(),
                "no row count supplied for the base table; savings estimated as zero",
            ));
            0
        }
    }
}

fn fold_pages(
    report: &ReportSnapshot,
    determinations: &[LevelDetermination],
    visual_savings: &[SavingsEstimate],
) -> Vec<PageSavings> {
    report
        .pages
        .iter()
        .map(|page| {
            let ids: Vec<&str> = report
                .visuals_on_page(&page.id)
                .map(|v| v.id.as_str())
                .collect();
            let parts: Vec<&SavingsEstimate> = visual_savings
                .iter()
                .filter(|e| ids.contains(&e.subject.as_str()))
                .collect();
            let levels = savings::distribution(
                determinations
                    .iter()
                    .filter(|d| ids.contains(&d.visual_id.as_str())),
            );
            PageSavings {
                page_id: page.id.clone(),
                estimate: savings::fold(SavingsScope::Page, page.id.clone(), &parts),
                levels,
            }
        })
        .collect()
}
