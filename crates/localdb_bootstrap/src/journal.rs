//! The journal engine: the reference embedded engine shipped with the crate.
//!
//! Rows are kept in memory. Every committed change is appended to the
//! filesystem adapter as one JSON line, and the journal is replayed when the
//! engine is constructed, so a durable adapter gives a database that
//! survives restarts.
//!
//! ## Journal format
//!
//! ```text
//! {"entry":"create_table","table":"notes","primary_key":"id"}\n
//! {"entry":"put","table":"notes","key":"1","row":{"id":1,"body":"hi"}}\n
//! {"entry":"remove","table":"notes","key":"1"}\n
//! ```
//!
//! A batch is applied to a copy of the tables first. Only when every
//! statement succeeded is the batch written and the copy swapped in. A
//! write that fails is truncated away again.

use crate::engine::{
    EngineBinding, EngineClient, EngineError, EngineOptions, EngineResult, Filter, Outcome, Row,
    Statement,
};
use localdb_fs::{FsAdapter, FsResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Binding for the journal engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalEngine;

impl JournalEngine {
    /// Name the engine reports.
    pub const NAME: &'static str = "journal";
}

impl EngineBinding for JournalEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn construct(&self, options: EngineOptions) -> EngineResult<Arc<dyn EngineClient>> {
        let EngineOptions {
            extensions,
            mut fs,
            relaxed_durability,
            module,
        } = options;

        let tables = replay(fs.as_mut())?;
        let extensions: Vec<String> = extensions.iter().map(|e| e.name().to_string()).collect();

        info!(
            adapter = %fs.kind(),
            tables = tables.len(),
            image_bytes = module.size_bytes(),
            ?extensions,
            "journal engine constructed"
        );

        Ok(Arc::new(JournalClient {
            inner: Mutex::new(Inner { fs, tables }),
            extensions,
            relaxed_durability,
        }))
    }
}

#[derive(Debug, Clone)]
struct Table {
    primary_key: String,
    rows: BTreeMap<String, Row>,
}

type Tables = BTreeMap<String, Table>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum Entry {
    CreateTable { table: String, primary_key: String },
    Put { table: String, key: String, row: Row },
    Remove { table: String, key: String },
}

struct Inner {
    fs: Box<dyn FsAdapter>,
    tables: Tables,
}

struct JournalClient {
    inner: Mutex<Inner>,
    extensions: Vec<String>,
    relaxed_durability: bool,
}

impl EngineClient for JournalClient {
    fn execute(&self, statement: Statement) -> EngineResult<Outcome> {
        let mut outcomes = self.execute_batch(vec![statement])?;
        Ok(outcomes.pop().unwrap_or_default())
    }

    fn execute_batch(&self, statements: Vec<Statement>) -> EngineResult<Vec<Outcome>> {
        let mut inner = self.inner.lock();

        if statements.iter().all(|s| !s.is_write()) {
            return statements
                .into_iter()
                .map(|s| apply(&mut inner.tables, s, &mut Vec::new()))
                .collect();
        }

        let mut staged = inner.tables.clone();
        let mut entries = Vec::new();
        let mut outcomes = Vec::with_capacity(statements.len());
        for statement in statements {
            outcomes.push(apply(&mut staged, statement, &mut entries)?);
        }

        if !entries.is_empty() {
            let mut buf = Vec::new();
            for entry in &entries {
                serde_json::to_writer(&mut buf, entry)
                    .map_err(|e| EngineError::Codec(e.to_string()))?;
                buf.push(b'\n');
            }
            let start = inner.fs.size()?;
            if let Err(error) = write_batch(inner.fs.as_mut(), &buf, self.relaxed_durability) {
                // The caller is told the batch failed, so replay must not see it.
                if let Err(rollback) = inner.fs.truncate(start) {
                    warn!(error = %rollback, "failed to roll back journal after a failed commit");
                }
                return Err(error.into());
            }
            debug!(entries = entries.len(), bytes = buf.len(), "batch committed");
        }

        inner.tables = staged;
        Ok(outcomes)
    }

    fn extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }
}

fn write_batch(fs: &mut dyn FsAdapter, buf: &[u8], relaxed_durability: bool) -> FsResult<()> {
    fs.append(buf)?;
    fs.flush()?;
    if !relaxed_durability {
        fs.sync()?;
    }
    Ok(())
}

fn key_of(value: &Value) -> String {
    value.to_string()
}

fn table_mut<'a>(tables: &'a mut Tables, name: &str) -> EngineResult<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| EngineError::UnknownTable(name.to_string()))
}

/// Keys of the rows matching `filter`, using the primary key directly when
/// the filter is on it.
fn matching_keys(table: &Table, filter: Option<&Filter>) -> Vec<String> {
    match filter {
        None => table.rows.keys().cloned().collect(),
        Some(f) if f.column == table.primary_key => {
            let key = key_of(&f.value);
            if table.rows.contains_key(&key) {
                vec![key]
            } else {
                Vec::new()
            }
        }
        Some(f) => table
            .rows
            .iter()
            .filter(|(_, row)| f.matches(row))
            .map(|(key, _)| key.clone())
            .collect(),
    }
}

fn apply(tables: &mut Tables, statement: Statement, entries: &mut Vec<Entry>) -> EngineResult<Outcome> {
    match statement {
        Statement::CreateTable { table, primary_key } => {
            if let Some(existing) = tables.get(&table) {
                if existing.primary_key != primary_key {
                    return Err(EngineError::Misconfigured(format!(
                        "table {table} exists with primary key {}",
                        existing.primary_key
                    )));
                }
                return Ok(Outcome::default());
            }
            tables.insert(
                table.clone(),
                Table {
                    primary_key: primary_key.clone(),
                    rows: BTreeMap::new(),
                },
            );
            entries.push(Entry::CreateTable { table, primary_key });
            Ok(Outcome {
                rows: Vec::new(),
                affected: 1,
            })
        }

        Statement::Insert { table, row } => {
            let target = table_mut(tables, &table)?;
            let key = match row.get(&target.primary_key) {
                Some(value) if !value.is_null() => key_of(value),
                _ => {
                    return Err(EngineError::MissingPrimaryKey {
                        column: target.primary_key.clone(),
                        table,
                    })
                }
            };
            if target.rows.contains_key(&key) {
                return Err(EngineError::DuplicateKey { table, key });
            }
            target.rows.insert(key.clone(), row.clone());
            entries.push(Entry::Put { table, key, row });
            Ok(Outcome {
                rows: Vec::new(),
                affected: 1,
            })
        }

        Statement::Select { table, filter } => {
            let target = table_mut(tables, &table)?;
            let rows: Vec<Row> = matching_keys(target, filter.as_ref())
                .iter()
                .filter_map(|key| target.rows.get(key).cloned())
                .collect();
            Ok(Outcome {
                affected: rows.len(),
                rows,
            })
        }

        Statement::Update {
            table,
            filter,
            patch,
        } => {
            let target = table_mut(tables, &table)?;
            if patch.contains_key(&target.primary_key) {
                return Err(EngineError::PrimaryKeyUpdate {
                    column: target.primary_key.clone(),
                    table,
                });
            }
            let keys = matching_keys(target, filter.as_ref());
            for key in &keys {
                if let Some(row) = target.rows.get_mut(key) {
                    for (column, value) in &patch {
                        row.insert(column.clone(), value.clone());
                    }
                    entries.push(Entry::Put {
                        table: table.clone(),
                        key: key.clone(),
                        row: row.clone(),
                    });
                }
            }
            Ok(Outcome {
                rows: Vec::new(),
                affected: keys.len(),
            })
        }

        Statement::Delete { table, filter } => {
            let target = table_mut(tables, &table)?;
            let keys = matching_keys(target, filter.as_ref());
            for key in &keys {
                target.rows.remove(key);
                entries.push(Entry::Remove {
                    table: table.clone(),
                    key: key.clone(),
                });
            }
            Ok(Outcome {
                rows: Vec::new(),
                affected: keys.len(),
            })
        }
    }
}

fn replay_entry(tables: &mut Tables, entry: Entry) -> EngineResult<()> {
    match entry {
        Entry::CreateTable { table, primary_key } => {
            tables.entry(table).or_insert_with(|| Table {
                primary_key,
                rows: BTreeMap::new(),
            });
        }
        Entry::Put { table, key, row } => {
            table_mut(tables, &table)?.rows.insert(key, row);
        }
        Entry::Remove { table, key } => {
            table_mut(tables, &table)?.rows.remove(&key);
        }
    }
    Ok(())
}

/// Rebuilds the tables from the journal.
///
/// A final line without its newline is a torn write: it is cut off and the
/// store truncated to the last complete entry. Any other undecodable line is
/// corruption.
fn replay(fs: &mut dyn FsAdapter) -> EngineResult<Tables> {
    let data = fs.read_all()?;
    let mut tables = Tables::new();
    let mut offset = 0usize;
    let mut entries = 0usize;

    while offset < data.len() {
        let (line, complete) = match data[offset..].iter().position(|&b| b == b'\n') {
            Some(pos) => (&data[offset..offset + pos], true),
            None => (&data[offset..], false),
        };

        if !complete {
            warn!(
                offset,
                bytes = line.len(),
                "discarding incomplete journal entry"
            );
            fs.truncate(offset as u64)?;
            break;
        }

        if !line.is_empty() {
            let entry: Entry = serde_json::from_slice(line).map_err(|e| {
                EngineError::Codec(format!("entry at offset {offset}: {e}"))
            })?;
            replay_entry(&mut tables, entry)?;
            entries += 1;
        }
        offset += line.len() + 1;
    }

    if entries > 0 {
        debug!(entries, tables = tables.len(), "journal replayed");
    }
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{compile_image, WasmtimeCompiler};
    use crate::download::DownloadedImage;
    use crate::engine::{Extension, VectorExtension};
    use bytes::Bytes;
    use localdb_fs::MemoryFs;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    async fn options(fs: Box<dyn FsAdapter>) -> EngineOptions {
        let image = DownloadedImage {
            bytes: Bytes::from_static(b"\0asm\x01\0\0\0"),
            sha256: String::new(),
        };
        let module = compile_image(Arc::new(WasmtimeCompiler::new()), image)
            .await
            .unwrap();
        EngineOptions {
            extensions: vec![Arc::new(VectorExtension) as Arc<dyn Extension>],
            fs,
            relaxed_durability: true,
            module,
        }
    }

    fn create(table: &str) -> Statement {
        Statement::CreateTable {
            table: table.into(),
            primary_key: "id".into(),
        }
    }

    fn insert(table: &str, value: Value) -> Statement {
        Statement::Insert {
            table: table.into(),
            row: row(value),
        }
    }

    fn select_all(table: &str) -> Statement {
        Statement::Select {
            table: table.into(),
            filter: None,
        }
    }

    #[tokio::test]
    async fn crud_round() {
        let client = JournalEngine
            .construct(options(Box::new(MemoryFs::new("t"))).await)
            .unwrap();
        assert_eq!(client.extensions(), vec!["vector".to_string()]);

        client.execute(create("notes")).unwrap();
        client.execute(insert("notes", json!({"id": 1, "body": "a"}))).unwrap();
        client.execute(insert("notes", json!({"id": 2, "body": "b"}))).unwrap();

        let updated = client
            .execute(Statement::Update {
                table: "notes".into(),
                filter: Some(Filter::eq("id", 2)),
                patch: row(json!({"body": "bb"})),
            })
            .unwrap();
        assert_eq!(updated.affected, 1);

        let found = client
            .execute(Statement::Select {
                table: "notes".into(),
                filter: Some(Filter::eq("body", "bb")),
            })
            .unwrap();
        assert_eq!(found.rows, vec![row(json!({"id": 2, "body": "bb"}))]);

        let deleted = client
            .execute(Statement::Delete {
                table: "notes".into(),
                filter: Some(Filter::eq("id", 1)),
            })
            .unwrap();
        assert_eq!(deleted.affected, 1);
        assert_eq!(client.execute(select_all("notes")).unwrap().affected, 1);
    }

    #[tokio::test]
    async fn constraint_errors() {
        let client = JournalEngine
            .construct(options(Box::new(MemoryFs::new("t"))).await)
            .unwrap();
        client.execute(create("notes")).unwrap();
        client.execute(insert("notes", json!({"id": 1}))).unwrap();

        assert!(matches!(
            client.execute(insert("notes", json!({"id": 1}))),
            Err(EngineError::DuplicateKey { .. })
        ));
        assert!(matches!(
            client.execute(insert("notes", json!({"body": "x"}))),
            Err(EngineError::MissingPrimaryKey { .. })
        ));
        assert!(matches!(
            client.execute(select_all("missing")),
            Err(EngineError::UnknownTable(_))
        ));
        assert!(matches!(
            client.execute(Statement::Update {
                table: "notes".into(),
                filter: None,
                patch: row(json!({"id": 9})),
            }),
            Err(EngineError::PrimaryKeyUpdate { .. })
        ));
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_trace() {
        let client = JournalEngine
            .construct(options(Box::new(MemoryFs::new("t"))).await)
            .unwrap();
        client.execute(create("notes")).unwrap();

        let result = client.execute_batch(vec![
            insert("notes", json!({"id": 1})),
            insert("notes", json!({"id": 1})),
        ]);
        assert!(result.is_err());
        assert_eq!(client.execute(select_all("notes")).unwrap().affected, 0);
    }

    /// Shares its bytes with the test and fails `flush` on demand.
    #[derive(Debug, Clone, Default)]
    struct FlakyFs {
        data: Arc<Mutex<Vec<u8>>>,
        fail_flush: Arc<std::sync::atomic::AtomicBool>,
    }

    impl FsAdapter for FlakyFs {
        fn kind(&self) -> localdb_fs::AdapterKind {
            localdb_fs::AdapterKind::Memory
        }

        fn name(&self) -> &str {
            "flaky"
        }

        fn read_at(&self, offset: u64, len: usize) -> FsResult<Vec<u8>> {
            let data = self.data.lock();
            let start = offset as usize;
            data.get(start..start + len)
                .map(<[u8]>::to_vec)
                .ok_or(localdb_fs::FsError::ReadPastEnd {
                    offset,
                    len,
                    size: data.len() as u64,
                })
        }

        fn append(&mut self, bytes: &[u8]) -> FsResult<u64> {
            let mut data = self.data.lock();
            let offset = data.len() as u64;
            data.extend_from_slice(bytes);
            Ok(offset)
        }

        fn flush(&mut self) -> FsResult<()> {
            if self.fail_flush.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            Ok(())
        }

        fn size(&self) -> FsResult<u64> {
            Ok(self.data.lock().len() as u64)
        }

        fn sync(&mut self) -> FsResult<()> {
            Ok(())
        }

        fn truncate(&mut self, new_size: u64) -> FsResult<()> {
            self.data.lock().truncate(new_size as usize);
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_commit_is_not_replayed() {
        let fs = FlakyFs::default();
        let client = JournalEngine
            .construct(options(Box::new(fs.clone())).await)
            .unwrap();
        client.execute(create("notes")).unwrap();
        let committed = fs.data.lock().len();

        fs.fail_flush.store(true, std::sync::atomic::Ordering::SeqCst);
        let result = client.execute(insert("notes", json!({"id": 1})));
        assert!(matches!(result, Err(EngineError::Fs(_))));
        assert_eq!(fs.data.lock().len(), committed);
        assert_eq!(client.execute(select_all("notes")).unwrap().affected, 0);

        let mut reopened = MemoryFs::with_data("t", fs.data.lock().clone());
        let tables = replay(&mut reopened).unwrap();
        assert!(tables["notes"].rows.is_empty());
    }

    #[tokio::test]
    async fn create_table_is_idempotent() {
        let client = JournalEngine
            .construct(options(Box::new(MemoryFs::new("t"))).await)
            .unwrap();
        assert_eq!(client.execute(create("notes")).unwrap().affected, 1);
        assert_eq!(client.execute(create("notes")).unwrap().affected, 0);
        assert!(matches!(
            client.execute(Statement::CreateTable {
                table: "notes".into(),
                primary_key: "uuid".into(),
            }),
            Err(EngineError::Misconfigured(_))
        ));
    }

    #[tokio::test]
    async fn journal_replays_on_construct() {
        let dir = tempfile::tempdir().unwrap();
        let open = || {
            Box::new(
                localdb_fs::DurableFs::open(dir.path(), "db", localdb_fs::Durability::Strict)
                    .unwrap(),
            ) as Box<dyn FsAdapter>
        };

        {
            let client = JournalEngine.construct(options(open()).await).unwrap();
            client
                .execute_batch(vec![
                    create("notes"),
                    insert("notes", json!({"id": "a", "n": 1})),
                    insert("notes", json!({"id": "b", "n": 2})),
                ])
                .unwrap();
            client
                .execute(Statement::Delete {
                    table: "notes".into(),
                    filter: Some(Filter::eq("id", "a")),
                })
                .unwrap();
        }

        let client = JournalEngine.construct(options(open()).await).unwrap();
        let rows = client.execute(select_all("notes")).unwrap().rows;
        assert_eq!(rows, vec![row(json!({"id": "b", "n": 2}))]);
    }

    #[tokio::test]
    async fn torn_tail_is_discarded() {
        let mut journal = br#"{"entry":"create_table","table":"notes","primary_key":"id"}"#.to_vec();
        journal.push(b'\n');
        let valid_len = journal.len();
        journal.extend_from_slice(br#"{"entry":"put","table":"no"#);

        let mut fs = MemoryFs::with_data("t", journal);
        let tables = replay(&mut fs).unwrap();
        assert!(tables.contains_key("notes"));
        assert_eq!(fs.data().len(), valid_len);
    }

    #[test]
    fn corrupt_entry_is_an_error() {
        let mut fs = MemoryFs::with_data("t", b"not json\n".to_vec());
        assert!(matches!(replay(&mut fs), Err(EngineError::Codec(_))));
    }
}
