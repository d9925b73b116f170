//! Bootstrap command implementation.

use super::printer::ProgressPrinter;
use localdb_bootstrap::{
    BootstrapConfig, BootstrapManager, HostEnvironment, LoadingState, Phase, Schema,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Options of the bootstrap command.
#[derive(Debug)]
pub struct BootstrapOptions {
    /// Image URL override.
    pub wasm_url: Option<String>,
    /// Durable data directory.
    pub data_dir: Option<PathBuf>,
    /// Database name.
    pub name: String,
    /// Expected image digest.
    pub sha256: Option<String>,
    /// Table definitions, `NAME` or `NAME:PK`.
    pub tables: Vec<String>,
    /// Disable relaxed durability.
    pub strict: bool,
}

/// Bootstrap summary.
#[derive(Debug, Serialize)]
pub struct BootstrapSummary {
    /// Final state.
    pub state: LoadingState,
    /// Image URL.
    pub wasm_url: String,
    /// Database name.
    pub database: String,
    /// Adapter kind.
    pub adapter: String,
    /// Bootstrap attempts.
    pub attempts: u64,
    /// Dependency phase duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies_ms: Option<u64>,
    /// Download duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_ms: Option<u64>,
    /// Tables created by the schema sync.
    pub tables_created: usize,
    /// Per-table row counts.
    pub tables: Vec<TableSummary>,
    /// Total wall-clock time.
    pub total_ms: u64,
}

/// One table in the summary.
#[derive(Debug, Serialize)]
pub struct TableSummary {
    /// Table name.
    pub name: String,
    /// Primary key column.
    pub primary_key: String,
    /// Row count.
    pub rows: usize,
}

/// Parses `NAME` or `NAME:PK` table definitions. The primary key defaults to `id`.
fn parse_schema(tables: &[String]) -> Result<Schema, String> {
    let mut schema = Schema::new();
    for entry in tables {
        let (name, pk) = match entry.split_once(':') {
            Some((name, pk)) => (name.trim(), pk.trim()),
            None => (entry.trim(), "id"),
        };
        if name.is_empty() || pk.is_empty() {
            return Err(format!("invalid table {entry:?}, expected NAME[:PK]"));
        }
        schema = schema.with_table(name, pk);
    }
    Ok(schema)
}

fn build_config(options: &BootstrapOptions) -> BootstrapConfig {
    let mut config = BootstrapConfig::new()
        .with_database_name(options.name.clone())
        .with_relaxed_durability(!options.strict);
    if let Some(url) = &options.wasm_url {
        config = config.with_wasm_url(url.clone());
    }
    if let Some(digest) = &options.sha256 {
        config = config.with_expected_sha256(digest.clone());
    }
    if let Some(dir) = &options.data_dir {
        config = config.with_environment(HostEnvironment::persistent(dir));
    }
    config
}

/// Runs the bootstrap command.
pub async fn run(options: BootstrapOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let schema = parse_schema(&options.tables)?;
    let config = build_config(&options);

    let manager = BootstrapManager::builder(schema).config(config).build()?;
    let printer = Arc::new(ProgressPrinter::new(format == "json"));
    let db = manager.initialize_with(printer.clone()).await?;
    let report = manager.migrate(true)?;

    let mut tables = Vec::new();
    for table in db.schema().tables() {
        tables.push(TableSummary {
            name: table.name.clone(),
            primary_key: table.primary_key.clone(),
            rows: db.count(&table.name)?,
        });
    }

    let summary = BootstrapSummary {
        state: manager.current_state(),
        wasm_url: manager.config().wasm_url.clone(),
        database: manager.config().database_name.clone(),
        adapter: manager
            .adapter_kind()
            .map(|k| k.to_string())
            .unwrap_or_default(),
        attempts: manager.attempts(),
        dependencies_ms: printer.elapsed_ms(Phase::Dependencies),
        download_ms: printer.elapsed_ms(Phase::Wasm),
        tables_created: report.tables_created,
        tables,
        total_ms: started.elapsed().as_millis() as u64,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            print_text_output(&summary);
        }
    }

    Ok(())
}

fn print_text_output(summary: &BootstrapSummary) {
    println!("LocalDB Bootstrap");
    println!("=================");
    println!("State:      {}", summary.state);
    println!("Image:      {}", summary.wasm_url);
    println!("Database:   {} ({})", summary.database, summary.adapter);
    println!("Attempts:   {}", summary.attempts);
    if let Some(ms) = summary.dependencies_ms {
        println!("Modules:    {ms} ms");
    }
    if let Some(ms) = summary.download_ms {
        println!("Download:   {ms} ms");
    }
    println!("Total:      {} ms", summary.total_ms);

    if !summary.tables.is_empty() {
        println!();
        println!("Tables ({} created)", summary.tables_created);
        println!("------");
        for table in &summary.tables {
            println!(
                "  {:<20} pk={:<12} rows={}",
                table.name, table.primary_key, table.rows
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_definitions() {
        let schema = parse_schema(&["notes".into(), "tags:name".into()]).unwrap();
        assert_eq!(schema.table("notes").unwrap().primary_key, "id");
        assert_eq!(schema.table("tags").unwrap().primary_key, "name");

        assert!(parse_schema(&[":id".into()]).is_err());
        assert!(parse_schema(&["notes:".into()]).is_err());
    }

    #[test]
    fn data_dir_selects_persistent_environment() {
        let options = BootstrapOptions {
            wasm_url: Some("/tmp/engine.wasm".into()),
            data_dir: Some(PathBuf::from("/tmp/localdb")),
            name: "notes".into(),
            sha256: None,
            tables: Vec::new(),
            strict: true,
        };
        let config = build_config(&options);
        assert_eq!(config.environment, HostEnvironment::persistent("/tmp/localdb"));
        assert_eq!(config.wasm_url, "/tmp/engine.wasm");
        assert!(!config.relaxed_durability);
    }
}
