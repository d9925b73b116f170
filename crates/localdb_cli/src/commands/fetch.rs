//! Fetch command implementation.

use super::printer::ProgressPrinter;
use localdb_bootstrap::{
    compile_image, fetch_image, source_for_config, BootstrapConfig, Phase, WasmtimeCompiler,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Fetch result.
#[derive(Debug, Serialize)]
pub struct FetchResult {
    /// Image URL.
    pub wasm_url: String,
    /// Image size in bytes.
    pub size_bytes: usize,
    /// Hex SHA-256 of the image.
    pub sha256: String,
    /// Number of module imports.
    pub imports: usize,
    /// Number of module exports.
    pub exports: usize,
    /// Download duration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_ms: Option<u64>,
    /// Compile duration.
    pub compile_ms: u64,
}

/// Runs the fetch command.
pub async fn run(
    wasm_url: Option<String>,
    sha256: Option<String>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = BootstrapConfig::new();
    if let Some(url) = wasm_url {
        config = config.with_wasm_url(url);
    }
    if let Some(digest) = sha256 {
        config = config.with_expected_sha256(digest);
    }
    config.validate()?;

    let source = source_for_config(&config)?;
    let printer = ProgressPrinter::new(format == "json");
    let image = fetch_image(
        source.as_ref(),
        &config.wasm_url,
        config.expected_sha256.as_deref(),
        |event| printer.progress(&event),
    )
    .await?;

    let compile_started = Instant::now();
    let module = compile_image(Arc::new(WasmtimeCompiler::new()), image).await?;

    let result = FetchResult {
        wasm_url: config.wasm_url.clone(),
        size_bytes: module.size_bytes(),
        sha256: module.sha256().to_string(),
        imports: module.module().imports().len(),
        exports: module.module().exports().len(),
        download_ms: printer.elapsed_ms(Phase::Wasm),
        compile_ms: compile_started.elapsed().as_millis() as u64,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!("Image:    {}", result.wasm_url);
            println!("Size:     {} bytes", result.size_bytes);
            println!("SHA-256:  {}", result.sha256);
            println!("Imports:  {}", result.imports);
            println!("Exports:  {}", result.exports);
            if let Some(ms) = result.download_ms {
                println!("Download: {ms} ms");
            }
            println!("Compile:  {} ms", result.compile_ms);
        }
    }

    Ok(())
}
