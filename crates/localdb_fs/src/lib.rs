//! # LocalDB Filesystem Adapters
//!
//! Byte-store adapters handed to the embedded database engine when it is
//! constructed.
//!
//! Adapters are **opaque byte stores**: they append, read back and flush
//! bytes. The engine owns every file format decision.
//!
//! ## Available Adapters
//!
//! - [`MemoryFs`] - volatile, discarded at process end
//! - [`DurableFs`] - file-backed, survives restarts, with [`Durability`]
//!   controlling whether flushes reach the disk synchronously
//!
//! ## Example
//!
//! ```rust
//! use localdb_fs::{FsAdapter, MemoryFs};
//!
//! let mut fs = MemoryFs::new("localdb");
//! let offset = fs.append(b"hello world").unwrap();
//! assert_eq!(fs.read_at(offset, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod durable;
mod error;
mod memory;

pub use adapter::{AdapterKind, Durability, FsAdapter};
pub use durable::{validate_name, DurableFs};
pub use error::{FsError, FsResult};
pub use memory::MemoryFs;
