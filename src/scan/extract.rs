//! Reference extraction: pulls every `{table, column}` and
//! `{table, measure}` token out of an arbitrary expression, whatever its
//! shape. Also produces the nesting/call counts the complexity score uses.

use super::scanner::{self, NestingProfile, Token};
use crate::analysis::diagnostics::Diagnostic;
use crate::model::{MeasureMeta, Reference};
use std::collections::{BTreeMap, BTreeSet};

/// Name → home-table lookup for resolving bare `[Measure]` references.
///
/// Duplicate measure names on different tables resolve to the
/// lexicographically first home table, which keeps resolution
/// deterministic regardless of input order.
#[derive(Debug, Clone, Default)]
pub struct MeasureCatalog {
    homes: BTreeMap<String, BTreeSet<String>>,
}

impl MeasureCatalog {
    pub fn new(measures: &[MeasureMeta]) -> Self {
        let mut homes: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for m in measures {
            homes
                .entry(m.name.to_ascii_lowercase())
                .or_default()
                .insert(m.table.clone());
        }
        Self { homes }
    }

    pub fn home_table(&self, measure: &str) -> Option<&str> {
        self.homes
            .get(&measure.to_ascii_lowercase())
            .and_then(|t| t.iter().next())
            .map(String::as_str)
    }

    pub fn contains(&self, measure: &str) -> bool {
        self.homes.contains_key(&measure.to_ascii_lowercase())
    }
}

/// The parsed form of one expression: its references plus scan statistics.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Value-ordered and deduplicated; identical inputs always yield an
    /// identical set.
    pub references: BTreeSet<Reference>,
    pub profile: NestingProfile,
    pub diagnostics: Vec<Diagnostic>,
}

impl Extraction {
    /// Additive complexity score: function-call count plus maximum
    /// nesting depth. Reporting only; nothing downstream consumes it.
    pub fn complexity(&self) -> usize {
        self.profile.call_count + self.profile.max_depth
    }
}

/// Memoized extraction results for one analysis run, keyed by measure
/// identity `(table, name)`. Built single-threaded before any parallel
/// consumption; read-only afterwards.
pub type ParseCache = BTreeMap<(String, String), Extraction>;

/// Parses every measure expression exactly once, so measures referenced
/// by many others are never re-scanned. The cache dies with the run.
pub fn build_parse_cache(
    measures: &[crate::model::MeasureMeta],
    catalog: &MeasureCatalog,
) -> ParseCache {
    let mut cache = ParseCache::new();
    for m in measures {
        let subject = format!("{}[{}]", m.table, m.name);
        let tokens = scanner::tokenize(&m.expression);
        cache.insert(
            (m.table.clone(), m.name.clone()),
            extract_references(&subject, &tokens, catalog),
        );
    }
    cache
}

/// Extracts all references from a token stream.
///
/// `Table[Col]` and `'Table Name'[Col]` become column references; a
/// `[Name]` with no preceding table token is a measure reference resolved
/// through the catalog. An unresolvable measure name is skipped with a
/// `MissingMetadata` diagnostic rather than failing the extraction.
pub fn extract_references(subject: &str, tokens: &[Token], catalog: &MeasureCatalog) -> Extraction {
    let mut out = Extraction {
        profile: scanner::nesting_profile(tokens),
        ..Default::default()
    };
    if out.profile.depth_capped {
        out.diagnostics.push(scanner::depth_cap_diagnostic(subject));
    }

    let mut i = 0;
    while i < tokens.len() {
        match (&tokens[i], tokens.get(i + 1)) {
            (Token::Ident(table) | Token::Quoted(table), Some(Token::Bracket(column))) => {
                out.references.insert(Reference::column(table.as_str(), column.as_str()));
                i += 2;
            }
            (Token::Bracket(name), _) => {
                match catalog.home_table(name) {
                    Some(home) => {
                        out.references.insert(Reference::measure(home, name.as_str()));
                    }
                    None => out.diagnostics.push(Diagnostic::missing(
                        subject,
                        format!("measure reference [{name}] not found in the model snapshot"),
                    )),
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    out
}
