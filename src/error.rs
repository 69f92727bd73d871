//! Error kinds surfaced by the filesystem layer.
//!
//! Remote-client errors are wrapped, never silently swallowed. Bulk
//! operations report per-key outcomes through [`BulkDeleteReport`] instead of
//! failing on the first key.

use crate::client::StoreError;
use crate::ops::BulkDeleteReport;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("no such file or directory: `{0}`")]
    NoSuchFile(String),

    #[error("target already exists: `{0}`")]
    FileAlreadyExists(String),

    #[error("directory not empty: `{0}`")]
    DirectoryNotEmpty(String),

    #[error("not a directory: `{0}`")]
    NotADirectory(String),

    #[error("is a directory: `{0}`")]
    IsADirectory(String),

    #[error("channel is closed")]
    ClosedChannel,

    #[error("write to `{key}` failed: {source}")]
    WriteFailed { key: String, source: StoreError },

    #[error("operation partially completed: {} deleted, {} failed", .0.deleted.len(), .0.failed.len())]
    PartialOperation(BulkDeleteReport),

    #[error(transparent)]
    Remote(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Build an `InvalidPath` error.
    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        FsError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Map a store error for a lookup on `display`: `NotFound` becomes
    /// `NoSuchFile`, everything else stays a remote failure.
    pub(crate) fn from_lookup(err: StoreError, display: &str) -> Self {
        match err {
            StoreError::NotFound { .. } => FsError::NoSuchFile(display.to_string()),
            other => FsError::Remote(other),
        }
    }
}
