//! Hierarchical paths over a flat key space.
//!
//! An [`ObjectPath`] is a bucket plus an ordered list of segments. It
//! round-trips to the literal store key via [`ObjectPath::key`] /
//! [`ObjectPath::from_key`]: the mapping is a stable bijection modulo
//! normalization (redundant separators collapsed, `.` and `..` resolved).
//! Two paths are equal iff their buckets and normalized segments are equal;
//! trailing separators never affect equality.

use crate::error::{FsError, FsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The key separator. A single ASCII character, never valid inside a segment.
pub const SEPARATOR: char = '/';

/// Longest key accepted by S3-compatible stores.
const MAX_KEY_LEN: usize = 1024;

/// An absolute path inside one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectPath {
    bucket: String,
    segments: Vec<String>,
}

impl ObjectPath {
    /// The bucket root: empty key, always a directory.
    pub fn root(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            segments: Vec::new(),
        }
    }

    /// Parse `raw` against `bucket`, normalizing as we go: empty segments
    /// and `.` are dropped, `..` pops the previous segment and fails with
    /// `InvalidPath` if it would escape the bucket root.
    pub fn parse(bucket: impl Into<String>, raw: &str) -> FsResult<Self> {
        let bucket = bucket.into();
        let mut segments: Vec<String> = Vec::new();

        for part in raw.split(SEPARATOR) {
            match part {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(FsError::invalid_path(raw, "escapes the bucket root"));
                    }
                }
                segment => {
                    validate_segment(raw, segment)?;
                    segments.push(segment.to_string());
                }
            }
        }

        let path = Self { bucket, segments };
        if path.key().len() > MAX_KEY_LEN {
            return Err(FsError::invalid_path(raw, "key exceeds maximum length"));
        }

        Ok(path)
    }

    /// Rebuild a path from a literal store key. Marker keys (trailing
    /// separator) map to the same path as their file twin.
    pub fn from_key(bucket: impl Into<String>, key: &str) -> FsResult<Self> {
        Self::parse(bucket, key)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The canonical object key: segments joined by the separator, no
    /// leading or trailing separator. Empty for the root.
    pub fn key(&self) -> String {
        self.segments.join("/")
    }

    /// The directory-marker form of the key: `key` plus one trailing
    /// separator. For the root this is the empty prefix.
    pub fn marker_key(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            let mut key = self.key();
            key.push(SEPARATOR);
            key
        }
    }

    /// Last segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Parent path; `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self {
            bucket: self.bucket.clone(),
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Resolve `raw` relative to this path.
    pub fn join(&self, raw: &str) -> FsResult<Self> {
        let mut combined = self.key();
        if !combined.is_empty() {
            combined.push(SEPARATOR);
        }
        combined.push_str(raw);
        Self::parse(self.bucket.clone(), &combined)
    }

    /// Append one already-validated segment.
    pub(crate) fn child(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self {
            bucket: self.bucket.clone(),
            segments,
        }
    }

    /// True when `self` is `ancestor` or lies beneath it, within the same
    /// bucket.
    pub fn starts_with(&self, ancestor: &ObjectPath) -> bool {
        self.bucket == ancestor.bucket
            && self.segments.len() >= ancestor.segments.len()
            && self.segments[..ancestor.segments.len()] == ancestor.segments[..]
    }

    /// Segments of `self` below `base`, or `None` when `self` is not under
    /// `base`.
    pub fn relative_to(&self, base: &ObjectPath) -> Option<&[String]> {
        if !self.starts_with(base) {
            return None;
        }
        Some(&self.segments[base.segments.len()..])
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}", self.bucket, self.key())
    }
}

/// Reject segments the store cannot address safely: control bytes,
/// backslashes and NUL, per the key rules of S3-compatible stores.
fn validate_segment(raw: &str, segment: &str) -> FsResult<()> {
    if segment
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(FsError::invalid_path(raw, "segment contains forbidden bytes"));
    }
    Ok(())
}
