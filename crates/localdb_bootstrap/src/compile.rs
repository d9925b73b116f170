//! Compilation of the downloaded engine image.

use crate::download::DownloadedImage;
use crate::error::{BootstrapError, BootstrapResult};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// A compiled engine image, ready to be instantiated by the engine binding.
#[derive(Clone)]
pub struct CompiledModule {
    module: wasmtime::Module,
    size_bytes: usize,
    sha256: String,
}

impl CompiledModule {
    /// Returns the wasmtime module.
    pub fn module(&self) -> &wasmtime::Module {
        &self.module
    }

    /// Returns the size of the source image.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Returns the hex SHA-256 of the source image.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

impl fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledModule")
            .field("size_bytes", &self.size_bytes)
            .field("sha256", &self.sha256)
            .field("imports", &self.module.imports().len())
            .field("exports", &self.module.exports().len())
            .finish()
    }
}

/// Turns image bytes into a module.
///
/// Implementations are called on the blocking thread pool.
pub trait WasmCompiler: Send + Sync {
    /// Compiles `bytes`.
    fn compile(&self, bytes: &[u8]) -> Result<wasmtime::Module, String>;
}

/// Compiles with a shared wasmtime [`wasmtime::Engine`].
#[derive(Clone, Default)]
pub struct WasmtimeCompiler {
    engine: wasmtime::Engine,
}

impl WasmtimeCompiler {
    /// Creates a compiler with the default engine configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a compiler around an existing engine.
    pub fn with_engine(engine: wasmtime::Engine) -> Self {
        Self { engine }
    }

    /// Returns the engine modules are compiled for.
    pub fn engine(&self) -> &wasmtime::Engine {
        &self.engine
    }
}

impl WasmCompiler for WasmtimeCompiler {
    fn compile(&self, bytes: &[u8]) -> Result<wasmtime::Module, String> {
        wasmtime::Module::new(&self.engine, bytes).map_err(|e| format!("{e:#}"))
    }
}

/// Compiles `image` off the async runtime.
///
/// # Errors
///
/// Returns [`BootstrapError::Compile`] if the bytes are not a valid module
/// or the compile task dies.
pub async fn compile_image(
    compiler: Arc<dyn WasmCompiler>,
    image: DownloadedImage,
) -> BootstrapResult<CompiledModule> {
    let started = Instant::now();
    let DownloadedImage { bytes, sha256 } = image;
    let size_bytes = bytes.len();

    let module = tokio::task::spawn_blocking(move || compiler.compile(&bytes))
        .await
        .map_err(|e| BootstrapError::Compile(format!("compile task failed: {e}")))?
        .map_err(BootstrapError::Compile)?;

    info!(
        size_bytes,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "image compiled"
    );

    Ok(CompiledModule {
        module,
        size_bytes,
        sha256,
    })
}
