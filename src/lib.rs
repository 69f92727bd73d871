//! A hierarchical filesystem view over S3-compatible object storage.
//!
//! Object stores expose a flat key space; this crate synthesizes the
//! filesystem on top of it. Keys containing `/` become paths, zero-byte
//! marker objects and common prefixes become directories, and positioned
//! reads and writes are adapted onto ranged GETs and multipart uploads.
//!
//! The entry point is [`ObjectFs`], which binds one bucket of one
//! [`ObjectStoreClient`] implementation:
//!
//! ```no_run
//! use objectfs::{FsConfig, MemoryStore, ObjectFs};
//! use std::sync::Arc;
//!
//! # async fn demo() -> objectfs::FsResult<()> {
//! let store = Arc::new(MemoryStore::with_bucket("data"));
//! let fs = ObjectFs::new(store, "data", FsConfig::default());
//!
//! fs.create_directory("reports").await?;
//! fs.write("reports/q3.csv", b"region,total\n").await?;
//!
//! let mut listing = fs.list_dir("reports").await?;
//! while let Some(entry) = listing.next_entry().await? {
//!     println!("{} ({:?})", entry.name(), entry.kind);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Nothing here is transactional: every operation maps to one or more
//! store calls, and tree-level operations report per-key outcomes instead
//! of pretending to be atomic.

pub mod attr;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fs;
pub mod list;
pub mod mem;
pub mod ops;
pub mod path;
pub mod read;
pub mod write;

pub use attr::{FileAttributes, PosixAttributes};
pub use client::{ObjectStat, ObjectStoreClient, PutOptions, StoreError};
pub use config::FsConfig;
pub use error::{FsError, FsResult};
pub use fs::{ObjectFs, WriteOptions};
pub use list::{DirEntry, DirStream, EntryKind};
pub use mem::MemoryStore;
pub use ops::{BulkDeleteReport, FailedKey, MoveReport};
pub use path::ObjectPath;
pub use read::ReadChannel;
pub use write::WriteChannel;
