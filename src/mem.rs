//! In-memory object store.
//!
//! A complete [`ObjectStoreClient`] over a `BTreeMap` key space — the
//! lexicographic ordering gives ListObjectsV2 pagination for free. Used by
//! the test suite and handy for embedding the filesystem without a remote
//! store. Failure injection switches simulate the partial-failure modes a
//! real store can exhibit (a failed part upload, a delete that errors for
//! one key, a copy that dies mid-move).

use crate::client::{
    CompletedPart, DeleteOutcome, ListPage, ListRequest, ObjectStat, ObjectStoreClient,
    PutOptions, StoreError, StoreResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use uuid::Uuid;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: Option<String>,
    metadata: HashMap<String, String>,
    last_modified: DateTime<Utc>,
    etag: String,
}

impl StoredObject {
    fn new(data: Bytes, opts: PutOptions) -> Self {
        let etag = format!("{:x}", md5::compute(&data));
        Self {
            data,
            content_type: opts.content_type,
            metadata: opts.metadata,
            last_modified: Utc::now(),
            etag,
        }
    }

    fn stat(&self, key: &str) -> ObjectStat {
        ObjectStat {
            key: key.to_string(),
            size: self.data.len() as u64,
            last_modified: self.last_modified,
            content_type: self.content_type.clone(),
            etag: Some(self.etag.clone()),
            metadata: self.metadata.clone(),
        }
    }
}

struct UploadSession {
    bucket: String,
    key: String,
    opts: PutOptions,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Default)]
struct Inner {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    uploads: HashMap<String, UploadSession>,
    fail_deletes: HashSet<String>,
    fail_copies: HashSet<String>,
    fail_parts: bool,
    fail_puts: bool,
}

/// In-memory S3-compatible store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh store with one bucket already created.
    pub fn with_bucket(name: impl Into<String>) -> Self {
        let store = Self::new();
        store.create_bucket(name);
        store
    }

    pub fn create_bucket(&self, name: impl Into<String>) {
        self.inner
            .write()
            .buckets
            .entry(name.into())
            .or_default();
    }

    /// Insert an object directly, bypassing the client trait. Test seeding.
    pub fn put_raw(&self, bucket: &str, key: &str, data: Bytes) {
        let mut inner = self.inner.write();
        inner
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject::new(data, PutOptions::default()));
    }

    /// Raw payload of an object, if present.
    pub fn raw_object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read();
        inner
            .buckets
            .get(bucket)?
            .get(key)
            .map(|o| o.data.to_vec())
    }

    /// All keys currently stored in `bucket`, in lexicographic order.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .buckets
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of multipart uploads that were started but neither completed
    /// nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.inner.read().uploads.len()
    }

    /// Make every `upload_part` call fail until switched off.
    pub fn fail_part_uploads(&self, fail: bool) {
        self.inner.write().fail_parts = fail;
    }

    /// Make every `put` call fail until switched off.
    pub fn fail_puts(&self, fail: bool) {
        self.inner.write().fail_puts = fail;
    }

    /// Fail the next delete of `key`, once. The retry succeeds.
    pub fn fail_delete_of(&self, key: impl Into<String>) {
        self.inner.write().fail_deletes.insert(key.into());
    }

    /// Fail the next copy whose source is `key`, once.
    pub fn fail_copy_of(&self, key: impl Into<String>) {
        self.inner.write().fail_copies.insert(key.into());
    }

    fn bucket_missing(bucket: &str) -> StoreError {
        StoreError::Unavailable(format!("bucket `{bucket}` does not exist"))
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryStore {
    async fn head(&self, bucket: &str, key: &str) -> StoreResult<ObjectStat> {
        let inner = self.inner.read();
        let objects = inner
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::bucket_missing(bucket))?;
        objects
            .get(key)
            .map(|o| o.stat(key))
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> StoreResult<Bytes> {
        let inner = self.inner.read();
        let objects = inner
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::bucket_missing(bucket))?;
        let object = objects.get(key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })?;

        match range {
            None => Ok(object.data.clone()),
            Some((first, last)) => {
                let len = object.data.len() as u64;
                if first >= len {
                    return Ok(Bytes::new());
                }
                let last = last.min(len - 1);
                Ok(object.data.slice(first as usize..=last as usize))
            }
        }
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        opts: PutOptions,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.fail_puts {
            return Err(StoreError::Unavailable("injected put failure".into()));
        }
        let objects = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::bucket_missing(bucket))?;
        objects.insert(key.to_string(), StoredObject::new(body, opts));
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions,
    ) -> StoreResult<String> {
        let mut inner = self.inner.write();
        if !inner.buckets.contains_key(bucket) {
            return Err(Self::bucket_missing(bucket));
        }
        let upload_id = Uuid::new_v4().to_string();
        inner.uploads.insert(
            upload_id.clone(),
            UploadSession {
                bucket: bucket.to_string(),
                key: key.to_string(),
                opts,
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> StoreResult<String> {
        let mut inner = self.inner.write();
        if inner.fail_parts {
            return Err(StoreError::Unavailable("injected part failure".into()));
        }
        let etag = format!("{:x}", md5::compute(&body));
        let session = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::Unavailable(format!("no such upload `{upload_id}`")))?;
        session.parts.insert(part_number, body);
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let session = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| StoreError::Unavailable(format!("no such upload `{upload_id}`")))?;

        let mut assembled = Vec::new();
        for part in &parts {
            let body = session.parts.get(&part.part_number).ok_or_else(|| {
                StoreError::Unavailable(format!("upload `{upload_id}` has no part {}", part.part_number))
            })?;
            assembled.extend_from_slice(body);
        }

        let objects = inner
            .buckets
            .get_mut(&session.bucket)
            .ok_or_else(|| Self::bucket_missing(&session.bucket))?;
        objects.insert(
            session.key.clone(),
            StoredObject::new(Bytes::from(assembled), session.opts),
        );
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
    ) -> StoreResult<()> {
        // Idempotent: aborting an unknown upload is fine.
        self.inner.write().uploads.remove(upload_id);
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, request: ListRequest) -> StoreResult<ListPage> {
        let inner = self.inner.read();
        let objects = inner
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::bucket_missing(bucket))?;

        let max_keys = if request.max_keys == 0 {
            1000
        } else {
            request.max_keys.clamp(1, 1000)
        };
        let fetch_limit = max_keys + 1;
        let prefix = request.prefix.unwrap_or_default();

        let lower = match &request.continuation_token {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Unbounded,
        };
        let mut rows: Vec<(String, ObjectStat)> = objects
            .range::<String, _>((lower, Bound::Unbounded))
            .filter(|(key, _)| key.starts_with(&prefix))
            .take(fetch_limit)
            .map(|(key, object)| (key.clone(), object.stat(key)))
            .collect();

        let mut is_truncated = false;
        let mut next_continuation_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            is_truncated = true;
            next_continuation_token = rows.last().map(|(key, _)| key.clone());
        }

        let mut contents = Vec::new();
        let mut common_prefixes = BTreeSet::new();
        for (key, stat) in rows {
            if let Some(delimiter) = &request.delimiter {
                if let Some(group) = compute_common_prefix(&key, &prefix, delimiter) {
                    common_prefixes.insert(group);
                    continue;
                }
            }
            contents.push(stat);
        }

        Ok(ListPage {
            objects: contents,
            common_prefixes: common_prefixes.into_iter().collect(),
            is_truncated,
            next_continuation_token,
        })
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        replace_metadata: Option<PutOptions>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if inner.fail_copies.remove(src_key) {
            return Err(StoreError::Unavailable("injected copy failure".into()));
        }

        let source = inner
            .buckets
            .get(src_bucket)
            .ok_or_else(|| Self::bucket_missing(src_bucket))?
            .get(src_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            })?;

        let mut copied = source;
        copied.last_modified = Utc::now();
        if let Some(opts) = replace_metadata {
            copied.content_type = opts.content_type;
            copied.metadata = opts.metadata;
        }

        inner
            .buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| Self::bucket_missing(dst_bucket))?
            .insert(dst_key.to_string(), copied);
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<DeleteOutcome> {
        let mut inner = self.inner.write();
        let Inner {
            buckets,
            fail_deletes,
            ..
        } = &mut *inner;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::bucket_missing(bucket))?;

        let mut outcome = DeleteOutcome::default();
        for key in keys {
            if fail_deletes.remove(key) {
                outcome
                    .failed
                    .push((key.clone(), "injected delete failure".into()));
                continue;
            }
            // Missing keys count as deleted, matching S3.
            objects.remove(key);
            outcome.deleted.push(key.clone());
        }
        Ok(outcome)
    }
}

/// Group `key` under its common prefix for delimiter listings, S3-style.
fn compute_common_prefix(key: &str, requested_prefix: &str, delimiter: &str) -> Option<String> {
    let after_prefix = key.strip_prefix(requested_prefix)?;
    let position = after_prefix.find(delimiter)?;
    let mut combined = String::with_capacity(requested_prefix.len() + position + delimiter.len());
    combined.push_str(requested_prefix);
    combined.push_str(&after_prefix[..position + delimiter.len()]);
    Some(combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::with_bucket("b");
        for key in ["a/1", "a/2", "b/1", "top"] {
            store.put_raw("b", key, Bytes::from_static(b"x"));
        }
        store
    }

    #[tokio::test]
    async fn delimiter_groups_keys_into_common_prefixes() {
        let store = seeded();
        let page = store
            .list_objects(
                "b",
                ListRequest {
                    delimiter: Some("/".into()),
                    ..ListRequest::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.common_prefixes, vec!["a/".to_string(), "b/".to_string()]);
        assert_eq!(page.objects.len(), 1);
        assert_eq!(page.objects[0].key, "top");
    }

    #[tokio::test]
    async fn pagination_visits_every_key_exactly_once() {
        let store = seeded();
        let mut token = None;
        let mut seen = Vec::new();
        loop {
            let page = store
                .list_objects(
                    "b",
                    ListRequest {
                        continuation_token: token.take(),
                        max_keys: 1,
                        ..ListRequest::default()
                    },
                )
                .await
                .unwrap();
            seen.extend(page.objects.into_iter().map(|o| o.key));
            if !page.is_truncated {
                break;
            }
            token = page.next_continuation_token;
        }
        assert_eq!(seen, vec!["a/1", "a/2", "b/1", "top"]);
    }

    #[tokio::test]
    async fn ranged_get_clamps_to_object_end() {
        let store = MemoryStore::with_bucket("b");
        store.put_raw("b", "k", Bytes::from_static(b"0123456789"));
        let body = store.get("b", "k", Some((8, 100))).await.unwrap();
        assert_eq!(&body[..], b"89");
        let empty = store.get("b", "k", Some((10, 20))).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn multipart_assembles_parts_in_order() {
        let store = MemoryStore::with_bucket("b");
        let id = store
            .create_multipart_upload("b", "k", PutOptions::default())
            .await
            .unwrap();
        let e1 = store
            .upload_part("b", "k", &id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        let e2 = store
            .upload_part("b", "k", &id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        store
            .complete_multipart_upload(
                "b",
                "k",
                &id,
                vec![
                    CompletedPart { part_number: 1, etag: e1 },
                    CompletedPart { part_number: 2, etag: e2 },
                ],
            )
            .await
            .unwrap();
        assert_eq!(store.raw_object("b", "k").unwrap(), b"hello world");
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn injected_delete_failure_is_one_shot() {
        let store = seeded();
        store.fail_delete_of("a/1");
        let keys = vec!["a/1".to_string(), "a/2".to_string()];
        let first = store.delete_objects("b", &keys).await.unwrap();
        assert_eq!(first.deleted, vec!["a/2".to_string()]);
        assert_eq!(first.failed.len(), 1);

        let retry = store
            .delete_objects("b", &["a/1".to_string()])
            .await
            .unwrap();
        assert_eq!(retry.deleted, vec!["a/1".to_string()]);
        assert!(retry.failed.is_empty());
    }
}
