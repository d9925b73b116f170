//! Table definitions the handle is bound to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Primary key column.
    pub primary_key: String,
}

/// The set of tables a [`crate::DatabaseHandle`] exposes.
///
/// ```rust
/// use localdb_bootstrap::Schema;
///
/// let schema = Schema::new()
///     .with_table("notes", "id")
///     .with_table("embeddings", "note_id");
/// assert_eq!(schema.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    tables: BTreeMap<String, TableDef>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a table.
    pub fn with_table(mut self, name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        let name = name.into();
        self.tables.insert(
            name.clone(),
            TableDef {
                name,
                primary_key: primary_key.into(),
            },
        );
        self
    }

    /// Looks up a table.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// Iterates tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if there are no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_ordered_and_replaceable() {
        let schema = Schema::new()
            .with_table("users", "id")
            .with_table("notes", "id")
            .with_table("users", "email");

        let names: Vec<&str> = schema.tables().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["notes", "users"]);
        assert_eq!(schema.table("users").unwrap().primary_key, "email");
        assert!(schema.table("missing").is_none());
    }
}
