//! Filesystem adapter trait definition.

use crate::error::FsResult;
use serde::Serialize;
use std::fmt;

/// Which family an adapter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Volatile, process-local storage.
    Memory,
    /// Persistent storage that survives restarts.
    Durable,
}

impl AdapterKind {
    /// Returns the stable name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Memory => "memory",
            AdapterKind::Durable => "durable",
        }
    }

    /// Returns true if data written through this kind outlives the process.
    pub fn is_durable(&self) -> bool {
        matches!(self, AdapterKind::Durable)
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a durable adapter pushes writes to stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// `flush` and `sync` wait for the data to reach the disk.
    #[default]
    Strict,
    /// Writes are handed to the OS and may stay buffered; neither `flush` nor
    /// `sync` waits for the disk.
    Relaxed,
}

/// A byte store the embedded engine persists through.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - under [`Durability::Strict`], `flush` makes all appended data durable
/// - adapters are `Send + Sync` so an engine can live behind an `Arc`
pub trait FsAdapter: Send + Sync + fmt::Debug {
    /// Returns the adapter family.
    fn kind(&self) -> AdapterKind;

    /// Returns the database name this adapter was opened for.
    fn name(&self) -> &str;

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FsError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> FsResult<Vec<u8>>;

    /// Reads the whole store.
    fn read_all(&self) -> FsResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }

    /// Appends data and returns the offset it was written at.
    fn append(&mut self, data: &[u8]) -> FsResult<u64>;

    /// Pushes pending writes towards stable storage.
    fn flush(&mut self) -> FsResult<()>;

    /// Returns the current size in bytes.
    fn size(&self) -> FsResult<u64>;

    /// Syncs data and metadata. A no-op for volatile and relaxed adapters.
    fn sync(&mut self) -> FsResult<()>;

    /// Drops everything after `new_size`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FsError::TruncateBeyondEnd`] if `new_size` exceeds
    /// the current size.
    fn truncate(&mut self, new_size: u64) -> FsResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(AdapterKind::Memory.as_str(), "memory");
        assert_eq!(AdapterKind::Durable.to_string(), "durable");
        assert!(AdapterKind::Durable.is_durable());
        assert!(!AdapterKind::Memory.is_durable());
    }

    #[test]
    fn durability_defaults_to_strict() {
        assert_eq!(Durability::default(), Durability::Strict);
    }
}
