//! Volatile in-memory adapter.

use crate::adapter::{AdapterKind, FsAdapter};
use crate::error::{FsError, FsResult};
use parking_lot::RwLock;

/// An adapter that keeps every byte in process memory.
///
/// Used when no persistent host storage is available. All data is lost when
/// the adapter is dropped.
///
/// # Example
///
/// ```rust
/// use localdb_fs::{FsAdapter, MemoryFs};
///
/// let mut fs = MemoryFs::new("scratch");
/// assert_eq!(fs.append(b"row").unwrap(), 0);
/// assert_eq!(fs.size().unwrap(), 3);
/// ```
#[derive(Debug)]
pub struct MemoryFs {
    name: String,
    data: RwLock<Vec<u8>>,
}

impl MemoryFs {
    /// Creates an empty adapter for the named database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: RwLock::new(Vec::new()),
        }
    }

    /// Creates an adapter preloaded with `data`.
    ///
    /// Useful for exercising journal replay.
    #[must_use]
    pub fn with_data(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl FsAdapter for MemoryFs {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Memory
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(FsError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> FsResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> FsResult<()> {
        Ok(())
    }

    fn size(&self) -> FsResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> FsResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> FsResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(FsError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}
