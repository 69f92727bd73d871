//! The object-store capability surface this crate consumes.
//!
//! Credentials, transport, signing and retries live behind this trait; the
//! filesystem layer only sees the documented call contract. Implementations
//! must be safe to share across tasks. Nothing in this crate retries a
//! failed remote call — that responsibility belongs to the client.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors an [`ObjectStoreClient`] implementation may report.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{key}` not found in bucket `{bucket}`")]
    NotFound { bucket: String, key: String },

    #[error("remote store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Metadata the store reports for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStat {
    /// Literal store key, including a trailing separator for markers.
    pub key: String,

    /// Content length in bytes.
    pub size: u64,

    /// Last-modified timestamp reported by the store.
    pub last_modified: DateTime<Utc>,

    /// MIME content type, if one was recorded at write time.
    pub content_type: Option<String>,

    /// ETag, if the store computed one.
    pub etag: Option<String>,

    /// User-defined metadata key/value pairs.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Attributes attached to a PUT, multipart upload or metadata-replacing copy.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// One page request against the store's ListObjectsV2-style listing.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    /// Upper bound on keys per page; `0` means the store default.
    pub max_keys: usize,
}

/// One page of listing results.
#[derive(Debug, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectStat>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

impl ListPage {
    /// True when the page carries neither objects nor grouped prefixes.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.common_prefixes.is_empty()
    }
}

/// One completed part of a multipart upload, in upload order.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    pub etag: String,
}

/// Per-key outcome of a bulk delete call.
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    /// Keys the store confirmed deleted (or that did not exist).
    pub deleted: Vec<String>,
    /// Keys that failed, with the store's reason.
    pub failed: Vec<(String, String)>,
}

/// Capability surface offered by an S3-compatible object store.
///
/// `get` takes an optional inclusive byte range `(first, last)`. Ranges
/// starting at or past the end of the object yield an empty body rather
/// than an error.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<ObjectStat>;

    async fn get(&self, bucket: &str, key: &str, range: Option<(u64, u64)>)
    -> StoreResult<Bytes>;

    async fn put(&self, bucket: &str, key: &str, body: Bytes, opts: PutOptions)
    -> StoreResult<()>;

    /// Begin a multipart upload; returns the store-assigned upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions,
    ) -> StoreResult<String>;

    /// Upload one part; returns its etag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<()>;

    /// Abort an in-flight multipart upload, freeing store-side part state.
    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> StoreResult<()>;

    async fn list_objects(&self, bucket: &str, request: ListRequest) -> StoreResult<ListPage>;

    /// Server-side copy. `replace_metadata` swaps the destination's metadata
    /// and content type instead of copying the source's.
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        replace_metadata: Option<PutOptions>,
    ) -> StoreResult<()>;

    /// Bulk delete. Missing keys count as deleted, matching S3 semantics.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<DeleteOutcome>;
}
