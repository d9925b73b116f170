//! The contract between the bootstrap manager and the embedded engine.
//!
//! The manager never talks to the engine directly. It hands an
//! [`EngineBinding`] the compiled image, the extensions and the filesystem
//! adapter, and receives an [`EngineClient`] that the ORM binding wraps.

use crate::compile::CompiledModule;
use localdb_fs::{FsAdapter, FsError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A row: column name to JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the engine and by handle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The table does not exist.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A row with the same primary key already exists.
    #[error("duplicate primary key in {table}: {key}")]
    DuplicateKey {
        /// The table.
        table: String,
        /// The key value.
        key: String,
    },

    /// A row lacks its primary key column.
    #[error("row for {table} is missing primary key column {column}")]
    MissingPrimaryKey {
        /// The table.
        table: String,
        /// The primary key column.
        column: String,
    },

    /// An update tried to change a primary key.
    #[error("cannot update primary key column {column} of {table}")]
    PrimaryKeyUpdate {
        /// The table.
        table: String,
        /// The primary key column.
        column: String,
    },

    /// The filesystem adapter failed.
    #[error("storage error: {0}")]
    Fs(#[from] FsError),

    /// Stored data could not be decoded.
    #[error("corrupt journal: {0}")]
    Codec(String),

    /// The engine was constructed with options it cannot use.
    #[error("misconfigured engine: {0}")]
    Misconfigured(String),
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// The column.
    pub column: String,
    /// The value the column must equal.
    pub value: Value,
}

impl Filter {
    /// Matches rows where `column == value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Returns true if `row` matches.
    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

/// A statement understood by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Statement {
    /// Creates a table if it does not exist.
    CreateTable {
        /// Table name.
        table: String,
        /// Primary key column.
        primary_key: String,
    },
    /// Inserts one row.
    Insert {
        /// Table name.
        table: String,
        /// The row.
        row: Row,
    },
    /// Reads rows, all of them when `filter` is `None`.
    Select {
        /// Table name.
        table: String,
        /// Optional filter.
        filter: Option<Filter>,
    },
    /// Merges `patch` into matching rows.
    Update {
        /// Table name.
        table: String,
        /// Optional filter.
        filter: Option<Filter>,
        /// Columns to overwrite.
        patch: Row,
    },
    /// Removes matching rows.
    Delete {
        /// Table name.
        table: String,
        /// Optional filter.
        filter: Option<Filter>,
    },
}

impl Statement {
    /// Returns the table the statement targets.
    pub fn table(&self) -> &str {
        match self {
            Statement::CreateTable { table, .. }
            | Statement::Insert { table, .. }
            | Statement::Select { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    /// Returns true if the statement changes data.
    pub fn is_write(&self) -> bool {
        !matches!(self, Statement::Select { .. })
    }
}

/// Result of one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Rows returned by a select.
    pub rows: Vec<Row>,
    /// Rows written, read or removed.
    pub affected: usize,
}

/// A query client for a constructed engine.
pub trait EngineClient: Send + Sync {
    /// Executes one statement.
    fn execute(&self, statement: Statement) -> EngineResult<Outcome>;

    /// Executes all statements atomically: either every one takes effect or
    /// none does.
    fn execute_batch(&self, statements: Vec<Statement>) -> EngineResult<Vec<Outcome>>;

    /// Names of the extensions the engine was constructed with.
    fn extensions(&self) -> Vec<String>;
}

/// An engine extension.
pub trait Extension: Send + Sync + fmt::Debug {
    /// The extension name.
    fn name(&self) -> &str;
}

/// Vector similarity extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorExtension;

impl VectorExtension {
    /// Name the extension registers under.
    pub const NAME: &'static str = "vector";
}

impl Extension for VectorExtension {
    fn name(&self) -> &str {
        Self::NAME
    }
}

/// Everything an engine needs to come up.
pub struct EngineOptions {
    /// Extensions to load.
    pub extensions: Vec<Arc<dyn Extension>>,
    /// The storage adapter. Ownership passes to the engine.
    pub fs: Box<dyn FsAdapter>,
    /// Whether commits may skip the disk sync.
    pub relaxed_durability: bool,
    /// The compiled engine image.
    pub module: CompiledModule,
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("extensions", &self.extensions)
            .field("fs", &self.fs)
            .field("relaxed_durability", &self.relaxed_durability)
            .field("module", &self.module)
            .finish()
    }
}

/// Constructs engine clients.
pub trait EngineBinding: Send + Sync {
    /// Engine name, for logs.
    fn name(&self) -> &str;

    /// Constructs an engine from `options`.
    fn construct(&self, options: EngineOptions) -> EngineResult<Arc<dyn EngineClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn filter_matches_on_equality() {
        let filter = Filter::eq("owner", "ada");
        assert!(filter.matches(&row(json!({"id": 1, "owner": "ada"}))));
        assert!(!filter.matches(&row(json!({"id": 2, "owner": "bob"}))));
        assert!(!filter.matches(&row(json!({"id": 3}))));
    }

    #[test]
    fn statement_table_and_kind() {
        let select = Statement::Select {
            table: "notes".into(),
            filter: None,
        };
        assert_eq!(select.table(), "notes");
        assert!(!select.is_write());

        let delete = Statement::Delete {
            table: "notes".into(),
            filter: Some(Filter::eq("id", 1)),
        };
        assert!(delete.is_write());
    }

    #[test]
    fn statement_serializes_tagged() {
        let stmt = Statement::CreateTable {
            table: "notes".into(),
            primary_key: "id".into(),
        };
        let encoded = serde_json::to_value(&stmt).unwrap();
        assert_eq!(
            encoded,
            json!({"op": "create_table", "table": "notes", "primary_key": "id"})
        );
    }

    #[test]
    fn vector_extension_name() {
        assert_eq!(VectorExtension.name(), "vector");
    }
}
