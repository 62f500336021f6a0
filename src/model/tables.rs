//! Typed, immutable model-side snapshot: tables, measures, relationships.
//!
//! Everything here is validated once at the ingestion boundary; downstream
//! components never perform presence checks on raw maps.

use crate::analysis::diagnostics::AnalysisError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub is_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub is_hidden: bool,
    /// Present for calculated tables (e.g. a SUMMARIZECOLUMNS expression).
    pub defining_expression: Option<String>,
    pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.name == column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasureMeta {
    /// Home table of the measure.
    pub table: String,
    pub name: String,
    pub expression: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    OneToMany,
    ManyToOne,
    OneToOne,
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipMeta {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub cardinality: Cardinality,
    pub is_active: bool,
}

/// The complete model-side input for one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub tables: Vec<TableMeta>,
    pub measures: Vec<MeasureMeta>,
    pub relationships: Vec<RelationshipMeta>,
    /// Optional caller-supplied base row counts, keyed by table name.
    pub row_counts: BTreeMap<String, u64>,
}

impl ModelSnapshot {
    /// Ingestion-boundary check. An empty model is a caller contract
    /// violation, the one hard failure the engine permits.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if self.tables.is_empty() {
            return Err(AnalysisError::EmptyModel);
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table).is_some_and(|t| t.has_column(column))
    }

    /// Tables on the "many" side of at least one active relationship and
    /// not hidden. These are the fact-table candidates the classifier
    /// compares aggregation candidates against.
    pub fn fact_tables(&self) -> Vec<&TableMeta> {
        let mut names: Vec<&str> = self
            .relationships
            .iter()
            .filter(|r| r.is_active)
            .filter_map(|r| match r.cardinality {
                Cardinality::ManyToOne | Cardinality::ManyToMany => Some(r.from_table.as_str()),
                Cardinality::OneToMany => Some(r.to_table.as_str()),
                Cardinality::OneToOne => None,
            })
            .collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .filter_map(|n| self.table(n))
            .filter(|t| !t.is_hidden)
            .collect()
    }

    /// Tables on the "one" side of at least one active relationship.
    pub fn dimension_tables(&self) -> Vec<&TableMeta> {
        let mut names: Vec<&str> = self
            .relationships
            .iter()
            .filter(|r| r.is_active)
            .filter_map(|r| match r.cardinality {
                Cardinality::ManyToOne => Some(r.to_table.as_str()),
                Cardinality::OneToMany => Some(r.from_table.as_str()),
                Cardinality::OneToOne | Cardinality::ManyToMany => None,
            })
            .collect();
        names.sort_unstable();
        names.dedup();
        names.into_iter().filter_map(|n| self.table(n)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(from: &str, to: &str) -> RelationshipMeta {
        RelationshipMeta {
            from_table: from.into(),
            from_column: "Key".into(),
            to_table: to.into(),
            to_column: "Key".into(),
            cardinality: Cardinality::ManyToOne,
            is_active: true,
        }
    }

    fn table(name: &str, hidden: bool) -> TableMeta {
        TableMeta {
            name: name.into(),
            is_hidden: hidden,
            defining_expression: None,
            columns: vec![ColumnMeta { name: "Key".into(), is_key: true }],
        }
    }

    #[test]
    fn test_empty_model_is_a_contract_violation() {
        let err = ModelSnapshot::default().validate().unwrap_err();
        assert_eq!(err, AnalysisError::EmptyModel);
    }

    #[test]
    fn test_fact_and_dimension_partition() {
        let model = ModelSnapshot {
            tables: vec![table("Sales", false), table("Product", false), table("Agg", true)],
            measures: vec![],
            relationships: vec![rel("Sales", "Product"), rel("Agg", "Product")],
            row_counts: BTreeMap::new(),
        };
        let facts: Vec<_> = model.fact_tables().iter().map(|t| t.name.as_str()).collect();
        let dims: Vec<_> = model.dimension_tables().iter().map(|t| t.name.as_str()).collect();
        // Hidden tables never count as facts, even on the many side.
        assert_eq!(facts, vec!["Sales"]);
        assert_eq!(dims, vec!["Product"]);
    }
}
