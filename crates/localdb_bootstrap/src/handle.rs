//! The schema-bound database handle consumers receive.

use crate::engine::{
    EngineClient, EngineError, EngineResult, Filter, Outcome, Row, Statement, VectorExtension,
};
use crate::schema::{Schema, TableDef};
use std::fmt;
use std::sync::Arc;

/// Binds an engine client to a schema.
pub trait OrmBinding: Send + Sync {
    /// Wraps `client` as a handle over `schema`.
    fn bind(&self, client: Arc<dyn EngineClient>, schema: &Schema) -> EngineResult<DatabaseHandle>;
}

/// The standard binding.
///
/// Refuses clients that were constructed without the extensions it needs.
#[derive(Debug, Clone)]
pub struct SchemaOrm {
    required: Vec<String>,
}

impl SchemaOrm {
    /// Creates a binding requiring the vector extension.
    pub fn new() -> Self {
        Self {
            required: vec![VectorExtension::NAME.to_string()],
        }
    }

    /// Creates a binding requiring exactly `extensions`.
    pub fn requiring<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: extensions.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for SchemaOrm {
    fn default() -> Self {
        Self::new()
    }
}

impl OrmBinding for SchemaOrm {
    fn bind(&self, client: Arc<dyn EngineClient>, schema: &Schema) -> EngineResult<DatabaseHandle> {
        let loaded = client.extensions();
        if let Some(missing) = self.required.iter().find(|r| !loaded.contains(r)) {
            return Err(EngineError::Misconfigured(format!(
                "extension {missing} is not loaded"
            )));
        }
        Ok(DatabaseHandle::new(client, schema.clone()))
    }
}

/// The database handle.
///
/// Cheap to share behind an `Arc`. Every operation names a table of the bound
/// schema; other tables fail with [`EngineError::UnknownTable`] before the
/// engine is consulted.
pub struct DatabaseHandle {
    client: Arc<dyn EngineClient>,
    schema: Schema,
}

impl DatabaseHandle {
    /// Creates a handle without extension checks.
    pub fn new(client: Arc<dyn EngineClient>, schema: Schema) -> Self {
        Self { client, schema }
    }

    /// The bound schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Extensions loaded in the engine.
    pub fn extensions(&self) -> Vec<String> {
        self.client.extensions()
    }

    fn table(&self, name: &str) -> EngineResult<&TableDef> {
        self.schema
            .table(name)
            .ok_or_else(|| EngineError::UnknownTable(name.to_string()))
    }

    /// Inserts `row` into `table`.
    pub fn insert(&self, table: &str, row: Row) -> EngineResult<()> {
        self.table(table)?;
        self.client.execute(Statement::Insert {
            table: table.to_string(),
            row,
        })?;
        Ok(())
    }

    /// Returns the rows of `table` matching `filter`.
    pub fn select(&self, table: &str, filter: Option<Filter>) -> EngineResult<Vec<Row>> {
        self.table(table)?;
        let outcome = self.client.execute(Statement::Select {
            table: table.to_string(),
            filter,
        })?;
        Ok(outcome.rows)
    }

    /// Returns the first row matching `filter`, if any.
    pub fn find_first(&self, table: &str, filter: Filter) -> EngineResult<Option<Row>> {
        Ok(self.select(table, Some(filter))?.into_iter().next())
    }

    /// Merges `patch` into matching rows and returns how many changed.
    pub fn update(&self, table: &str, filter: Option<Filter>, patch: Row) -> EngineResult<usize> {
        self.table(table)?;
        let outcome = self.client.execute(Statement::Update {
            table: table.to_string(),
            filter,
            patch,
        })?;
        Ok(outcome.affected)
    }

    /// Removes matching rows and returns how many were removed.
    pub fn delete(&self, table: &str, filter: Option<Filter>) -> EngineResult<usize> {
        self.table(table)?;
        let outcome = self.client.execute(Statement::Delete {
            table: table.to_string(),
            filter,
        })?;
        Ok(outcome.affected)
    }

    /// Number of rows in `table`.
    pub fn count(&self, table: &str) -> EngineResult<usize> {
        Ok(self.select(table, None)?.len())
    }

    /// Runs `f` against a transaction and commits its writes atomically.
    ///
    /// Nothing reaches the engine if `f` returns an error.
    ///
    /// ```rust,ignore
    /// db.transaction(|tx| {
    ///     tx.insert("notes", note)?;
    ///     tx.delete("drafts", Some(Filter::eq("id", 7)))?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn transaction<F, R>(&self, f: F) -> EngineResult<R>
    where
        F: FnOnce(&mut Transaction<'_>) -> EngineResult<R>,
    {
        let mut tx = Transaction {
            schema: &self.schema,
            statements: Vec::new(),
        };
        let result = f(&mut tx)?;
        if !tx.statements.is_empty() {
            self.client.execute_batch(tx.statements)?;
        }
        Ok(result)
    }

    /// Creates every schema table that does not exist yet, in one batch.
    ///
    /// Returns the number of tables created.
    pub fn sync_schema(&self) -> EngineResult<usize> {
        let statements: Vec<Statement> = self
            .schema
            .tables()
            .map(|t| Statement::CreateTable {
                table: t.name.clone(),
                primary_key: t.primary_key.clone(),
            })
            .collect();
        if statements.is_empty() {
            return Ok(0);
        }
        let outcomes = self.client.execute_batch(statements)?;
        Ok(outcomes.iter().map(|o: &Outcome| o.affected).sum())
    }
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("schema", &self.schema)
            .field("extensions", &self.client.extensions())
            .finish()
    }
}

/// Buffered writes committed by [`DatabaseHandle::transaction`].
#[derive(Debug)]
pub struct Transaction<'a> {
    schema: &'a Schema,
    statements: Vec<Statement>,
}

impl Transaction<'_> {
    fn check(&self, table: &str) -> EngineResult<()> {
        match self.schema.table(table) {
            Some(_) => Ok(()),
            None => Err(EngineError::UnknownTable(table.to_string())),
        }
    }

    /// Buffers an insert.
    pub fn insert(&mut self, table: &str, row: Row) -> EngineResult<()> {
        self.check(table)?;
        self.statements.push(Statement::Insert {
            table: table.to_string(),
            row,
        });
        Ok(())
    }

    /// Buffers an update.
    pub fn update(&mut self, table: &str, filter: Option<Filter>, patch: Row) -> EngineResult<()> {
        self.check(table)?;
        self.statements.push(Statement::Update {
            table: table.to_string(),
            filter,
            patch,
        });
        Ok(())
    }

    /// Buffers a delete.
    pub fn delete(&mut self, table: &str, filter: Option<Filter>) -> EngineResult<()> {
        self.check(table)?;
        self.statements.push(Statement::Delete {
            table: table.to_string(),
            filter,
        });
        Ok(())
    }

    /// Number of buffered writes.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
