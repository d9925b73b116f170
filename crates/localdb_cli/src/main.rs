//! LocalDB CLI
//!
//! Command-line tools for bringing up a LocalDB database.
//!
//! # Commands
//!
//! - `bootstrap` - Run a full bootstrap, sync the schema and print a summary
//! - `fetch` - Download and compile the engine image only
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LocalDB command-line tools.
#[derive(Parser)]
#[command(name = "localdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring up the database and sync the schema
    Bootstrap {
        /// Engine image URL, file:// URL or path
        #[arg(long)]
        wasm_url: Option<String>,

        /// Store data durably in this directory instead of in memory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Database name
        #[arg(short, long, default_value = localdb_bootstrap::DEFAULT_DATABASE_NAME)]
        name: String,

        /// Expected SHA-256 of the image (hex)
        #[arg(long)]
        sha256: Option<String>,

        /// Table to create, as NAME or NAME:PRIMARY_KEY (repeatable)
        #[arg(short, long = "table", value_name = "NAME[:PK]")]
        tables: Vec<String>,

        /// Sync every commit to disk
        #[arg(long)]
        strict: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Download and compile the engine image without constructing a database
    Fetch {
        /// Engine image URL, file:// URL or path
        #[arg(long)]
        wasm_url: Option<String>,

        /// Expected SHA-256 of the image (hex)
        #[arg(long)]
        sha256: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so json output stays parseable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Bootstrap {
            wasm_url,
            data_dir,
            name,
            sha256,
            tables,
            strict,
            format,
        } => {
            let options = commands::bootstrap::BootstrapOptions {
                wasm_url,
                data_dir,
                name,
                sha256,
                tables,
                strict,
            };
            commands::bootstrap::run(options, &format).await?;
        }
        Commands::Fetch {
            wasm_url,
            sha256,
            format,
        } => {
            commands::fetch::run(wasm_url, sha256, &format).await?;
        }
        Commands::Version => {
            println!("LocalDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Engine image: {}", localdb_bootstrap::DEFAULT_WASM_URL);
        }
    }

    Ok(())
}
