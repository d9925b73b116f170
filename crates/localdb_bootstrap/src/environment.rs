//! Host environment detection and filesystem adapter selection.

use localdb_fs::{AdapterKind, Durability, DurableFs, FsAdapter, FsResult, MemoryFs};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the persistent data directory.
///
/// When set and non-empty the host is treated as [`HostEnvironment::Persistent`].
pub const DATA_DIR_ENV: &str = "LOCALDB_DATA_DIR";

/// Where the engine runs, which decides how its data is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEnvironment {
    /// No persistent storage available. Data lives in memory only.
    Headless,
    /// Durable storage under `root`.
    Persistent {
        /// Directory holding the database files.
        root: PathBuf,
    },
}

impl HostEnvironment {
    /// Detects the environment from [`DATA_DIR_ENV`].
    pub fn detect() -> Self {
        match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::Persistent {
                root: PathBuf::from(dir),
            },
            _ => Self::Headless,
        }
    }

    /// Creates a persistent environment rooted at `root`.
    pub fn persistent(root: impl Into<PathBuf>) -> Self {
        Self::Persistent { root: root.into() }
    }

    /// Returns the adapter kind this environment selects.
    pub fn adapter_kind(&self) -> AdapterKind {
        match self {
            Self::Headless => AdapterKind::Memory,
            Self::Persistent { .. } => AdapterKind::Durable,
        }
    }
}

impl fmt::Display for HostEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Headless => f.write_str("headless"),
            Self::Persistent { root } => write!(f, "persistent ({})", root.display()),
        }
    }
}

/// Constructs filesystem adapters.
///
/// Resolved as the `fs-adapters` runtime module, so tests can substitute
/// adapters that fail or record their input.
pub trait FsAdapterFactory: Send + Sync {
    /// Creates a volatile adapter.
    fn memory(&self, name: &str) -> FsResult<Box<dyn FsAdapter>>;

    /// Opens a durable adapter under `root`.
    fn durable(
        &self,
        root: &Path,
        name: &str,
        durability: Durability,
    ) -> FsResult<Box<dyn FsAdapter>>;
}

/// The adapters shipped in `localdb_fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardAdapters;

impl FsAdapterFactory for StandardAdapters {
    fn memory(&self, name: &str) -> FsResult<Box<dyn FsAdapter>> {
        Ok(Box::new(MemoryFs::new(name)))
    }

    fn durable(
        &self,
        root: &Path,
        name: &str,
        durability: Durability,
    ) -> FsResult<Box<dyn FsAdapter>> {
        Ok(Box::new(DurableFs::open(root, name, durability)?))
    }
}

/// Builds the adapter for `environment`.
pub(crate) fn select_adapter(
    factory: &dyn FsAdapterFactory,
    environment: &HostEnvironment,
    name: &str,
    relaxed_durability: bool,
) -> FsResult<Box<dyn FsAdapter>> {
    let adapter = match environment {
        HostEnvironment::Headless => factory.memory(name)?,
        HostEnvironment::Persistent { root } => {
            let durability = if relaxed_durability {
                Durability::Relaxed
            } else {
                Durability::Strict
            };
            factory.durable(root, name, durability)?
        }
    };
    debug!(kind = %adapter.kind(), name, %environment, "filesystem adapter selected");
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_kind_follows_environment() {
        assert_eq!(HostEnvironment::Headless.adapter_kind(), AdapterKind::Memory);
        assert_eq!(
            HostEnvironment::persistent("/var/lib/localdb").adapter_kind(),
            AdapterKind::Durable
        );
    }

    #[test]
    fn headless_selects_memory() {
        let adapter = select_adapter(&StandardAdapters, &HostEnvironment::Headless, "db", true)
            .unwrap();
        assert_eq!(adapter.kind(), AdapterKind::Memory);
        assert_eq!(adapter.name(), "db");
    }

    #[test]
    fn persistent_selects_durable() {
        let dir = tempfile::tempdir().unwrap();
        let env = HostEnvironment::persistent(dir.path());
        let adapter = select_adapter(&StandardAdapters, &env, "db", false).unwrap();
        assert_eq!(adapter.kind(), AdapterKind::Durable);
        assert!(dir.path().join("db.localdb").exists());
    }

    #[test]
    fn display() {
        assert_eq!(HostEnvironment::Headless.to_string(), "headless");
        assert!(HostEnvironment::persistent("/data")
            .to_string()
            .starts_with("persistent"));
    }
}
