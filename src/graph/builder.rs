//! Builds the "depends-on" graph from every measure's (and calculated
//! table's) extracted references, with a transpose view for impact queries
//! computed once, and tolerant cycle collection.

use crate::analysis::diagnostics::{Diagnostic, DiagnosticKind};
use crate::model::{ModelSnapshot, RefScope, Reference};
use crate::scan::extract::{MeasureCatalog, ParseCache};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Path-length cap for cycle-hunting traversal; deeper chains are
/// truncated with a `RecursionLimitExceeded` diagnostic.
const MAX_TRAVERSAL_DEPTH: usize = 256;

/// Identity of one graph node. Value-ordered so set membership never
/// depends on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DependencyNode {
    Table(String),
    Column { table: String, name: String },
    Measure { table: String, name: String },
}

impl DependencyNode {
    pub fn from_reference(r: &Reference) -> Self {
        match r.scope {
            RefScope::Column => DependencyNode::Column {
                table: r.table.clone(),
                name: r.name.clone(),
            },
            RefScope::Measure => DependencyNode::Measure {
                table: r.table.clone(),
                name: r.name.clone(),
            },
        }
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyNode::Table(t) => write!(f, "{t}"),
            DependencyNode::Column { table, name } => write!(f, "{table}[{name}]"),
            DependencyNode::Measure { table, name } => write!(f, "{table}[{name}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    ColumnRef,
    MeasureRef,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: DependencyNode,
    pub to: DependencyNode,
    pub kind: EdgeKind,
}

/// Plain-value view of the graph for the analysis report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraphSummary {
    pub nodes: Vec<DependencyNode>,
    pub edges: Vec<DependencyEdge>,
    pub cycles: Vec<Vec<DependencyNode>>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<DependencyNode, EdgeKind>,
    index: BTreeMap<DependencyNode, NodeIndex>,
    /// Forward adjacency ("depends on"), value-keyed.
    dependencies: BTreeMap<DependencyNode, BTreeSet<DependencyNode>>,
    /// Transpose adjacency ("is depended on by"), computed once at build.
    dependents: BTreeMap<DependencyNode, BTreeSet<DependencyNode>>,
    /// Each cycle's member path, starting at the node that closed it.
    pub cycles: Vec<Vec<DependencyNode>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl DependencyGraph {
    /// Builds the graph from the run's parse cache. References pointing
    /// outside the model snapshot are skipped with `MissingMetadata`;
    /// everything else proceeds.
    pub fn build(model: &ModelSnapshot, catalog: &MeasureCatalog, cache: &ParseCache) -> Self {
        let mut diagnostics = Vec::new();
        let mut edge_set: BTreeSet<DependencyEdge> = BTreeSet::new();
        let mut node_set: BTreeSet<DependencyNode> = BTreeSet::new();

        // Measures. The cache is keyed by value, so iteration order is
        // already (table, name) order.
        for ((table, name), extraction) in cache {
            let from = DependencyNode::Measure {
                table: table.clone(),
                name: name.clone(),
            };
            node_set.insert(from.clone());
            for r in &extraction.references {
                Self::push_edge(model, catalog, &from, r, &mut edge_set, &mut node_set, &mut diagnostics);
            }
        }

        // Calculated tables: their defining expressions are dependencies
        // of the table itself.
        for t in &model.tables {
            let Some(expr) = &t.defining_expression else {
                continue;
            };
            let from = DependencyNode::Table(t.name.clone());
            node_set.insert(from.clone());
            let tokens = crate::scan::tokenize(expr);
            let extraction = crate::scan::extract_references(&t.name, &tokens, catalog);
            diagnostics.extend(extraction.diagnostics);
            for r in &extraction.references {
                Self::push_edge(model, catalog, &from, r, &mut edge_set, &mut node_set, &mut diagnostics);
            }
        }

        let mut built = Self {
            diagnostics,
            ..Default::default()
        };
        for node in &node_set {
            let idx = built.graph.add_node(node.clone());
            built.index.insert(node.clone(), idx);
        }
        for edge in &edge_set {
            let from = built.index[&edge.from];
            let to = built.index[&edge.to];
            built.graph.add_edge(from, to, edge.kind);
            built
                .dependencies
                .entry(edge.from.clone())
                .or_default()
                .insert(edge.to.clone());
            built
                .dependents
                .entry(edge.to.clone())
                .or_default()
                .insert(edge.from.clone());
        }

        built.collect_cycles();
        built
    }

    fn push_edge(
        model: &ModelSnapshot,
        catalog: &MeasureCatalog,
        from: &DependencyNode,
        r: &Reference,
        edge_set: &mut BTreeSet<DependencyEdge>,
        node_set: &mut BTreeSet<DependencyNode>,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        let known = match r.scope {
            RefScope::Column => model.has_column(&r.table, &r.name),
            RefScope::Measure => catalog.contains(&r.name),
        };
        if !known {
            diagnostics.push(Diagnostic::missing(
                from.to_string(),
                format!("reference {r} points outside the model snapshot; edge skipped"),
            ));
            return;
        }
        let to = DependencyNode::from_reference(r);
        let kind = match r.scope {
            RefScope::Column => EdgeKind::ColumnRef,
            RefScope::Measure => EdgeKind::MeasureRef,
        };
        node_set.insert(to.clone());
        edge_set.insert(DependencyEdge {
            from: from.clone(),
            to,
            kind,
        });
    }

    fn collect_cycles(&mut self) {
        let (cycles, capped) = find_cycles(&self.dependencies);
        if capped {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::RecursionLimitExceeded,
                "dependency graph",
                format!("traversal truncated at depth {MAX_TRAVERSAL_DEPTH}"),
            ));
        }
        for cycle in &cycles {
            self.diagnostics.push(Diagnostic::new(
                DiagnosticKind::CyclicDependency {
                    members: cycle.iter().map(|n| n.to_string()).collect(),
                },
                cycle[0].to_string(),
                format!(
                    "dependency cycle of {} member(s): {}",
                    cycle.len(),
                    cycle.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(" -> ")
                ),
            ));
        }
        self.cycles = cycles;
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    /// On the active path.
    Visiting,
    Visited,
}

/// Depth-first walk keeping a per-path visited set. A node reappearing in
/// the active path closes a cycle: its member path is recorded (once per
/// member set) and the walk does not re-descend. Linear in nodes + edges.
fn find_cycles(
    deps: &BTreeMap<DependencyNode, BTreeSet<DependencyNode>>,
) -> (Vec<Vec<DependencyNode>>, bool) {
    let mut state: BTreeMap<&DependencyNode, VisitState> = BTreeMap::new();
    let mut path: Vec<&DependencyNode> = Vec::new();
    let mut cycles: Vec<Vec<DependencyNode>> = Vec::new();
    let mut seen: BTreeSet<BTreeSet<DependencyNode>> = BTreeSet::new();
    let mut capped = false;

    fn visit<'a>(
        node: &'a DependencyNode,
        deps: &'a BTreeMap<DependencyNode, BTreeSet<DependencyNode>>,
        state: &mut BTreeMap<&'a DependencyNode, VisitState>,
        path: &mut Vec<&'a DependencyNode>,
        cycles: &mut Vec<Vec<DependencyNode>>,
        seen: &mut BTreeSet<BTreeSet<DependencyNode>>,
        capped: &mut bool,
    ) {
        match state.get(node).copied().unwrap_or(VisitState::Unvisited) {
            VisitState::Visited => return,
            VisitState::Visiting => {
                if let Some(pos) = path.iter().position(|&n| n == node) {
                    let members: Vec<DependencyNode> =
                        path[pos..].iter().map(|&n| n.clone()).collect();
                    let key: BTreeSet<DependencyNode> = members.iter().cloned().collect();
                    if seen.insert(key) {
                        cycles.push(members);
                    }
                }
                return;
            }
            VisitState::Unvisited => {}
        }
        if path.len() >= MAX_TRAVERSAL_DEPTH {
            *capped = true;
            return;
        }
        state.insert(node, VisitState::Visiting);
        path.push(node);
        if let Some(next) = deps.get(node) {
            for n in next {
                visit(n, deps, state, path, cycles, seen, capped);
            }
        }
        path.pop();
        state.insert(node, VisitState::Visited);
    }

    for node in deps.keys() {
        visit(node, deps, &mut state, &mut path, &mut cycles, &mut seen, &mut capped);
    }
    (cycles, capped)
}

impl DependencyGraph {
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Direct dependencies of a node.
    pub fn dependencies_of(&self, node: &DependencyNode) -> Option<&BTreeSet<DependencyNode>> {
        self.dependencies.get(node)
    }

    /// Direct dependents of a node (the transpose view).
    pub fn dependents_of(&self, node: &DependencyNode) -> Option<&BTreeSet<DependencyNode>> {
        self.dependents.get(node)
    }

    /// Everything transitively affected by a change to `node`, via the
    /// precomputed transpose. Cycle-safe.
    pub fn impact_of(&self, node: &DependencyNode) -> BTreeSet<DependencyNode> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<&DependencyNode> = VecDeque::new();
        queue.push_back(node);
        while let Some(n) = queue.pop_front() {
            if let Some(deps) = self.dependents.get(n) {
                for d in deps {
                    if visited.insert(d.clone()) {
                        queue.push_back(d);
                    }
                }
            }
        }
        visited
    }

    pub fn summary(&self) -> DependencyGraphSummary {
        let mut edges: Vec<DependencyEdge> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                Some(DependencyEdge {
                    from: self.graph[a].clone(),
                    to: self.graph[b].clone(),
                    kind: self.graph[e],
                })
            })
            .collect();
        edges.sort();
        DependencyGraphSummary {
            nodes: self.index.keys().cloned().collect(),
            edges,
            cycles: self.cycles.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnMeta, MeasureMeta, TableMeta};
    use crate::scan::extract::{build_parse_cache, MeasureCatalog};

    fn model_with(measures: Vec<MeasureMeta>) -> ModelSnapshot {
        ModelSnapshot {
            tables: vec![TableMeta {
                name: "Sales".into(),
                is_hidden: false,
                defining_expression: None,
                columns: vec![
                    ColumnMeta { name: "Amount".into(), is_key: false },
                    ColumnMeta { name: "Qty".into(), is_key: false },
                ],
            }],
            measures,
            relationships: vec![],
            row_counts: BTreeMap::new(),
        }
    }

    fn measure(name: &str, expr: &str) -> MeasureMeta {
        MeasureMeta {
            table: "Sales".into(),
            name: name.into(),
            expression: expr.into(),
        }
    }

    fn build(model: &ModelSnapshot) -> DependencyGraph {
        let catalog = MeasureCatalog::new(&model.measures);
        let cache = build_parse_cache(&model.measures, &catalog);
        DependencyGraph::build(model, &catalog, &cache)
    }

    #[test]
    fn test_edges_for_columns_and_measures() {
        let model = model_with(vec![
            measure("Total", "SUM(Sales[Amount])"),
            measure("Double", "[Total] * 2"),
        ]);
        let g = build(&model);

        let total = DependencyNode::Measure { table: "Sales".into(), name: "Total".into() };
        let double = DependencyNode::Measure { table: "Sales".into(), name: "Double".into() };
        let amount = DependencyNode::Column { table: "Sales".into(), name: "Amount".into() };

        assert!(g.dependencies_of(&total).unwrap().contains(&amount));
        assert!(g.dependencies_of(&double).unwrap().contains(&total));
        // Transpose view answers "who depends on Amount" without recomputation.
        let impact = g.impact_of(&amount);
        assert!(impact.contains(&total));
        assert!(impact.contains(&double));
        assert!(g.cycles.is_empty());
    }

    #[test]
    fn test_build_is_deterministic_across_input_order() {
        let a = model_with(vec![
            measure("A", "SUM(Sales[Amount])"),
            measure("B", "[A] + SUM(Sales[Qty])"),
        ]);
        let mut b = a.clone();
        b.measures.reverse();
        assert_eq!(build(&a).summary(), build(&b).summary());
    }

    #[test]
    fn test_mutual_recursion_is_data_not_error() {
        let model = model_with(vec![measure("A", "[B] + 1"), measure("B", "[A] + 1")]);
        let g = build(&model);
        assert_eq!(g.cycles.len(), 1);
        assert_eq!(g.cycles[0].len(), 2);
        // Both members are flagged by the same cycle diagnostic.
        let diag = g
            .diagnostics
            .iter()
            .find(|d| matches!(d.kind, DiagnosticKind::CyclicDependency { .. }))
            .unwrap();
        let DiagnosticKind::CyclicDependency { members } = &diag.kind else {
            unreachable!()
        };
        assert!(members.contains(&"Sales[A]".to_string()));
        assert!(members.contains(&"Sales[B]".to_string()));
    }

    #[test]
    fn test_missing_reference_is_skipped_not_fatal() {
        let model = model_with(vec![measure("Broken", "SUM(Ghost[Col]) + SUM(Sales[Amount])")]);
        let g = build(&model);
        assert!(g
            .diagnostics
            .iter()
            .any(|d| matches!(d.kind, DiagnosticKind::MissingMetadata)));
        // The resolvable half of the expression still produced its edge.
        let broken = DependencyNode::Measure { table: "Sales".into(), name: "Broken".into() };
        assert_eq!(g.dependencies_of(&broken).unwrap().len(), 1);
    }

    #[test]
    fn test_calculated_table_contributes_table_edges() {
        let mut model = model_with(vec![]);
        model.tables.push(TableMeta {
            name: "Agg".into(),
            is_hidden: true,
            defining_expression: Some("SUMMARIZE(Sales, Sales[Qty])".into()),
            columns: vec![ColumnMeta { name: "Qty".into(), is_key: false }],
        });
        let g = build(&model);
        let agg = DependencyNode::Table("Agg".into());
        let qty = DependencyNode::Column { table: "Sales".into(), name: "Qty".into() };
        assert!(g.dependencies_of(&agg).unwrap().contains(&qty));
    }
}
