//! File-backed durable adapter.

use crate::adapter::{AdapterKind, Durability, FsAdapter};
use crate::error::{FsError, FsResult};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// File extension used for database stores.
const STORE_EXTENSION: &str = "localdb";

/// An adapter persisting to a single file under a root directory.
///
/// The store for database `name` lives at `<root>/<name>.localdb`. The file
/// is locked exclusively while the adapter is open, so a second open fails
/// with [`FsError::Locked`] until the first adapter is dropped.
///
/// # Durability
///
/// - [`Durability::Strict`]: `flush()` calls `sync_data`, `sync()` calls
///   `sync_all`
/// - [`Durability::Relaxed`]: both only push buffered bytes to the OS
///
/// Relaxed mode trades crash durability of the most recent writes for
/// latency; the engine's own journal stays consistent either way.
///
/// # Example
///
/// ```no_run
/// use localdb_fs::{Durability, DurableFs, FsAdapter};
/// use std::path::Path;
///
/// let mut fs = DurableFs::open(Path::new("/var/lib/app"), "localdb", Durability::Relaxed).unwrap();
/// fs.append(b"persistent data").unwrap();
/// fs.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct DurableFs {
    name: String,
    path: PathBuf,
    durability: Durability,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl DurableFs {
    /// Opens or creates the store for `name` under `root`.
    ///
    /// The root directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::InvalidName`] for names that are empty or contain
    /// path components, [`FsError::Locked`] if the store is already open, or
    /// an I/O error if the file cannot be opened.
    pub fn open(root: &Path, name: &str, durability: Durability) -> FsResult<Self> {
        validate_name(name)?;
        std::fs::create_dir_all(root)?;

        let path = root.join(format!("{name}.{STORE_EXTENSION}"));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        // Released when the file is closed
        if file.try_lock_exclusive().is_err() {
            return Err(FsError::Locked(path));
        }
        let size = file.metadata()?.len();

        Ok(Self {
            name: name.to_string(),
            path,
            durability,
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path of the store file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the durability mode the store was opened with.
    #[must_use]
    pub fn durability(&self) -> Durability {
        self.durability
    }
}

/// Checks that `name` can be used as a store file name.
///
/// # Errors
///
/// Returns [`FsError::InvalidName`] for names that are empty, start with a
/// dot, contain a path separator or NUL, or are longer than 128 bytes.
pub fn validate_name(name: &str) -> FsResult<()> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.len() > 128;
    if bad {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl FsAdapter for DurableFs {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Durable
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(FsError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> FsResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> FsResult<()> {
        let mut file = self.file.write();
        file.flush()?;
        if self.durability == Durability::Strict {
            file.sync_data()?;
        }
        Ok(())
    }

    fn size(&self) -> FsResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> FsResult<()> {
        let mut file = self.file.write();
        match self.durability {
            Durability::Strict => file.sync_all()?,
            Durability::Relaxed => file.flush()?,
        }
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> FsResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(FsError::TruncateBeyondEnd {
                requested: new_size,
                size: *size,
            });
        }

        file.set_len(new_size)?;
        if self.durability == Durability::Strict {
            file.sync_all()?;
        }
        *size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn durable_creates_store_under_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("data");

        let fs = DurableFs::open(&root, "localdb", Durability::Strict).unwrap();
        assert_eq!(fs.kind(), AdapterKind::Durable);
        assert_eq!(fs.name(), "localdb");
        assert_eq!(fs.path(), root.join("localdb.localdb"));
        assert!(fs.path().exists());
        assert_eq!(fs.size().unwrap(), 0);
    }

    #[test]
    fn durable_store_is_exclusive() {
        let dir = tempdir().unwrap();
        let fs = DurableFs::open(dir.path(), "db", Durability::Relaxed).unwrap();

        let second = DurableFs::open(dir.path(), "db", Durability::Relaxed);
        assert!(matches!(second, Err(FsError::Locked(path)) if path.as_path() == fs.path()));

        drop(fs);
        assert!(DurableFs::open(dir.path(), "db", Durability::Relaxed).is_ok());
    }

    #[test]
    fn durable_append_and_read() {
        let dir = tempdir().unwrap();
        let mut fs = DurableFs::open(dir.path(), "db", Durability::Strict).unwrap();

        assert_eq!(fs.append(b"hello").unwrap(), 0);
        assert_eq!(fs.append(b" world").unwrap(), 5);
        assert_eq!(fs.read_at(6, 5).unwrap(), b"world");
        assert_eq!(fs.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn durable_relaxed_survives_reopen() {
        let dir = tempdir().unwrap();

        {
            let mut fs = DurableFs::open(dir.path(), "db", Durability::Relaxed).unwrap();
            assert_eq!(fs.durability(), Durability::Relaxed);
            fs.append(b"persistent data").unwrap();
            fs.flush().unwrap();
            fs.sync().unwrap();
        }

        let fs = DurableFs::open(dir.path(), "db", Durability::Relaxed).unwrap();
        assert_eq!(fs.size().unwrap(), 15);
        assert_eq!(fs.read_all().unwrap(), b"persistent data");
    }

    #[test]
    fn durable_rejects_path_like_names() {
        let dir = tempdir().unwrap();
        for name in ["", "../escape", "a/b", ".hidden", "back\\slash"] {
            assert!(
                matches!(
                    DurableFs::open(dir.path(), name, Durability::Strict),
                    Err(FsError::InvalidName(_))
                ),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn durable_truncate() {
        let dir = tempdir().unwrap();
        let mut fs = DurableFs::open(dir.path(), "db", Durability::Strict).unwrap();
        fs.append(b"hello world").unwrap();

        fs.truncate(5).unwrap();
        assert_eq!(fs.read_all().unwrap(), b"hello");
        assert!(matches!(
            fs.truncate(6),
            Err(FsError::TruncateBeyondEnd { .. })
        ));
    }

    #[test]
    fn durable_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut fs = DurableFs::open(dir.path(), "db", Durability::Strict).unwrap();
        fs.append(b"abc").unwrap();
        assert!(matches!(fs.read_at(2, 5), Err(FsError::ReadPastEnd { .. })));
    }
}
