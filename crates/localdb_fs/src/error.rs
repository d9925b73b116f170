//! Error types for filesystem adapters.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for adapter operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errors raised by filesystem adapters.
#[derive(Debug, Error)]
pub enum FsError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the store.
    #[error("read beyond end of store: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current store size.
        size: u64,
    },

    /// Attempted to grow the store through truncation.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    TruncateBeyondEnd {
        /// The requested size.
        requested: u64,
        /// The current store size.
        size: u64,
    },

    /// Another adapter, possibly in another process, holds the store.
    #[error("store {0} is locked by another process")]
    Locked(PathBuf),

    /// The adapter name cannot be used as a file name.
    #[error("invalid adapter name: {0:?}")]
    InvalidName(String),
}
