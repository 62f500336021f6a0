//! The `Reference` value type: one `{table, name}` pair naming a column or
//! measure, compared by value everywhere.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a reference names a column or a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RefScope {
    Column,
    Measure,
}

/// A resolved reference to a column or measure in the model.
///
/// Equality, ordering and hashing are all by value; no part of the engine
/// keys anything on insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub scope: RefScope,
    pub table: String,
    pub name: String,
}

impl Reference {
    pub fn column(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: RefScope::Column,
            table: table.into(),
            name: name.into(),
        }
    }

    pub fn measure(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: RefScope::Measure,
            table: table.into(),
            name: name.into(),
        }
    }

    /// Identity used for filter-context membership: `(table, name)`.
    pub fn key(&self) -> (&str, &str) {
        (&self.table, &self.name)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.table.contains(' ') {
            write!(f, "'{}'[{}]", self.table, self.name)
        } else {
            write!(f, "{}[{}]", self.table, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_spaced_tables() {
        assert_eq!(Reference::column("Sales", "Amount").to_string(), "Sales[Amount]");
        assert_eq!(
            Reference::column("Sales Agg", "Amount").to_string(),
            "'Sales Agg'[Amount]"
        );
    }

    #[test]
    fn test_value_equality_ignores_scope_only_when_keyed() {
        let a = Reference::column("T", "C");
        let b = Reference::measure("T", "C");
        assert_ne!(a, b);
        assert_eq!(a.key(), b.key());
    }
}
