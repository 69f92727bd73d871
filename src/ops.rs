//! Copy, move and delete over trees of objects.
//!
//! None of these operations are atomic — the store offers no multi-key
//! transaction, so a tree-level operation is a sequence of single-key calls
//! that can stop part way. Instead of collapsing that into a boolean, bulk
//! operations return typed reports listing exactly which keys succeeded and
//! which failed, and never roll back: a half-deleted tree stays half
//! deleted, and the caller decides whether to retry the remainder.

use crate::client::{CompletedPart, DeleteOutcome, ListRequest, ObjectStoreClient, PutOptions};
use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::list::{self, Resolved};
use crate::path::ObjectPath;
use tracing::{debug, warn};

/// One key a bulk operation could not process.
#[derive(Debug, Clone)]
pub struct FailedKey {
    pub key: String,
    pub reason: String,
}

/// Per-key outcome of a (possibly recursive) delete.
#[derive(Debug, Default)]
pub struct BulkDeleteReport {
    pub deleted: Vec<String>,
    pub failed: Vec<FailedKey>,
}

impl BulkDeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fold in one store-level batch outcome.
    fn absorb(&mut self, outcome: DeleteOutcome) {
        self.deleted.extend(outcome.deleted);
        self.failed.extend(
            outcome
                .failed
                .into_iter()
                .map(|(key, reason)| FailedKey { key, reason }),
        );
    }

    /// `Ok(self)` when every key went through, otherwise
    /// [`FsError::PartialOperation`] carrying the report.
    pub fn into_result(self) -> FsResult<BulkDeleteReport> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(FsError::PartialOperation(self))
        }
    }
}

/// Outcome of a move. A key lands in exactly one of the three lists.
#[derive(Debug, Default)]
pub struct MoveReport {
    /// Source keys copied to the destination and removed from the source.
    pub moved: Vec<String>,
    /// Source keys whose copy succeeded but whose source delete failed;
    /// these now exist on both sides.
    pub copied_source_remains: Vec<String>,
    /// Source keys that could not be copied at all.
    pub failed: Vec<FailedKey>,
}

impl MoveReport {
    pub fn is_complete(&self) -> bool {
        self.copied_source_remains.is_empty() && self.failed.is_empty()
    }
}

/// Copy a file or a whole directory tree. Object metadata travels with each
/// copied key. Fails before touching the store when `dst` lies inside `src`.
pub(crate) async fn copy_path(
    client: &dyn ObjectStoreClient,
    src: &ObjectPath,
    dst: &ObjectPath,
    cfg: &FsConfig,
) -> FsResult<()> {
    guard_tree_endpoints(src, dst)?;

    match list::resolve(client, src).await? {
        None => Err(FsError::NoSuchFile(src.to_string())),
        Some(Resolved::File(stat)) => {
            copy_object(client, src.bucket(), &src.key(), &dst.key(), stat.size, cfg).await
        }
        Some(Resolved::DirMarker(_)) | Some(Resolved::VirtualDir) => {
            copy_tree(client, src, dst, cfg).await
        }
    }
}

/// Move a file or tree: copy everything, then bulk-delete the source keys
/// whose copies landed. Nothing is rolled back on partial failure; the
/// report says which keys now live where.
pub(crate) async fn move_path(
    client: &dyn ObjectStoreClient,
    src: &ObjectPath,
    dst: &ObjectPath,
    cfg: &FsConfig,
) -> FsResult<MoveReport> {
    guard_tree_endpoints(src, dst)?;

    let sources = match list::resolve(client, src).await? {
        None => return Err(FsError::NoSuchFile(src.to_string())),
        Some(Resolved::File(stat)) => vec![(src.key(), stat.size)],
        Some(Resolved::DirMarker(_)) | Some(Resolved::VirtualDir) => {
            tree_keys(client, src, cfg).await?
        }
    };

    let mut report = MoveReport::default();
    let mut copied: Vec<String> = Vec::new();
    let src_prefix = src.marker_key();
    let dst_prefix = dst.marker_key();

    for (key, size) in sources {
        let target = remap_key(&key, &src.key(), &src_prefix, &dst.key(), &dst_prefix);
        match copy_object(client, src.bucket(), &key, &target, size, cfg).await {
            Ok(()) => copied.push(key),
            Err(err) => {
                warn!("copy of `{key}` during move failed: {err}");
                report.failed.push(FailedKey {
                    key,
                    reason: err.to_string(),
                });
            }
        }
    }

    for batch in copied.chunks(cfg.max_delete_batch) {
        let outcome = client.delete_objects(src.bucket(), batch).await?;
        report.moved.extend(outcome.deleted);
        report
            .copied_source_remains
            .extend(outcome.failed.into_iter().map(|(key, reason)| {
                warn!("source `{key}` survived its move: {reason}");
                key
            }));
    }

    Ok(report)
}

/// Delete the entry at `path`. A non-recursive delete of a non-empty
/// directory fails with [`FsError::DirectoryNotEmpty`]; a recursive delete
/// walks the whole subtree in store-sized batches.
pub(crate) async fn delete_path(
    client: &dyn ObjectStoreClient,
    path: &ObjectPath,
    recursive: bool,
    cfg: &FsConfig,
) -> FsResult<BulkDeleteReport> {
    if path.is_root() {
        return Err(FsError::invalid_path(
            path.to_string(),
            "cannot delete the bucket root",
        ));
    }

    let keys: Vec<String> = match list::resolve(client, path).await? {
        None => return Err(FsError::NoSuchFile(path.to_string())),
        Some(Resolved::File(_)) => vec![path.key()],
        Some(Resolved::DirMarker(_)) | Some(Resolved::VirtualDir) => {
            if recursive {
                let mut keys: Vec<String> = tree_keys(client, path, cfg)
                    .await?
                    .into_iter()
                    .map(|(key, _)| key)
                    .collect();
                // The plain key form may exist as a shadowed object.
                keys.push(path.key());
                keys
            } else if list::has_children(client, path).await? {
                return Err(FsError::DirectoryNotEmpty(path.to_string()));
            } else {
                // Both key forms, in case the directory was ever written as
                // a plain object.
                vec![path.marker_key(), path.key()]
            }
        }
    };

    let mut report = BulkDeleteReport::default();
    for batch in keys.chunks(cfg.max_delete_batch) {
        let outcome = client.delete_objects(path.bucket(), batch).await?;
        report.absorb(outcome);
    }
    debug!(
        "deleted {} key(s) under `{path}`, {} failed",
        report.deleted.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Copy one object, choosing between the store's native copy and a streamed
/// ranged-read re-upload based on the object size.
async fn copy_object(
    client: &dyn ObjectStoreClient,
    bucket: &str,
    src_key: &str,
    dst_key: &str,
    size: u64,
    cfg: &FsConfig,
) -> FsResult<()> {
    if size < cfg.large_copy_threshold {
        client
            .copy_object(bucket, src_key, bucket, dst_key, None)
            .await?;
        return Ok(());
    }
    streamed_copy(client, bucket, src_key, dst_key, size, cfg).await
}

/// Rebuild an object at `dst_key` from ranged reads of `src_key` via a
/// multipart upload. Used when the object exceeds the store's single-call
/// copy limit. The upload is aborted on any failure.
async fn streamed_copy(
    client: &dyn ObjectStoreClient,
    bucket: &str,
    src_key: &str,
    dst_key: &str,
    size: u64,
    cfg: &FsConfig,
) -> FsResult<()> {
    let stat = client.head(bucket, src_key).await?;
    let opts = PutOptions {
        content_type: stat.content_type,
        metadata: stat.metadata,
    };

    // Grow the part size if the configured one would overflow the store's
    // part-count limit.
    let mut part_size = cfg.part_size.max(1) as u64;
    if size.div_ceil(part_size) > u64::from(cfg.max_parts) {
        part_size = size.div_ceil(u64::from(cfg.max_parts));
    }

    let upload_id = client
        .create_multipart_upload(bucket, dst_key, opts)
        .await?;
    match stream_parts(client, bucket, src_key, dst_key, &upload_id, size, part_size).await {
        Ok(parts) => {
            client
                .complete_multipart_upload(bucket, dst_key, &upload_id, parts)
                .await?;
            Ok(())
        }
        Err(err) => {
            if let Err(abort_err) = client
                .abort_multipart_upload(bucket, dst_key, &upload_id)
                .await
            {
                warn!("abort of copy upload `{upload_id}` failed: {abort_err}");
            }
            Err(err)
        }
    }
}

async fn stream_parts(
    client: &dyn ObjectStoreClient,
    bucket: &str,
    src_key: &str,
    dst_key: &str,
    upload_id: &str,
    size: u64,
    part_size: u64,
) -> FsResult<Vec<CompletedPart>> {
    let mut parts = Vec::new();
    let mut offset = 0u64;
    let mut part_number = 1u32;
    while offset < size {
        let last = (offset + part_size).min(size) - 1;
        let body = client
            .get(bucket, src_key, Some((offset, last)))
            .await?;
        let etag = client
            .upload_part(bucket, dst_key, upload_id, part_number, body)
            .await?;
        parts.push(CompletedPart { part_number, etag });
        offset = last + 1;
        part_number += 1;
    }
    Ok(parts)
}

/// Every key in the subtree rooted at `dir`, markers included, with sizes.
/// A flat paginated listing — no delimiter, so nesting depth is irrelevant.
async fn tree_keys(
    client: &dyn ObjectStoreClient,
    dir: &ObjectPath,
    cfg: &FsConfig,
) -> FsResult<Vec<(String, u64)>> {
    let mut keys = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = client
            .list_objects(
                dir.bucket(),
                ListRequest {
                    prefix: Some(dir.marker_key()),
                    delimiter: None,
                    continuation_token: token.take(),
                    max_keys: cfg.list_page_size,
                },
            )
            .await?;
        keys.extend(page.objects.into_iter().map(|o| (o.key, o.size)));
        if page.is_truncated {
            token = page.next_continuation_token;
            if token.is_none() {
                break;
            }
        } else {
            break;
        }
    }
    Ok(keys)
}

async fn copy_tree(
    client: &dyn ObjectStoreClient,
    src: &ObjectPath,
    dst: &ObjectPath,
    cfg: &FsConfig,
) -> FsResult<()> {
    let src_key = src.key();
    let src_prefix = src.marker_key();
    let dst_key = dst.key();
    let dst_prefix = dst.marker_key();

    let sources = tree_keys(client, src, cfg).await?;
    if sources.is_empty() {
        // A virtual directory with no listed keys cannot happen (virtual
        // means "has children"), so this is an empty marker-less tree.
        return Ok(());
    }

    for (key, size) in sources {
        let target = remap_key(&key, &src_key, &src_prefix, &dst_key, &dst_prefix);
        copy_object(client, src.bucket(), &key, &target, size, cfg).await?;
    }
    Ok(())
}

/// Translate one source key into its destination key, preserving the
/// subtree-relative suffix. The source's own marker maps to the
/// destination's marker.
fn remap_key(
    key: &str,
    src_key: &str,
    src_prefix: &str,
    dst_key: &str,
    dst_prefix: &str,
) -> String {
    if key == src_key {
        return dst_key.to_string();
    }
    match key.strip_prefix(src_prefix) {
        Some(rest) => format!("{dst_prefix}{rest}"),
        None => dst_key.to_string(),
    }
}

fn guard_tree_endpoints(src: &ObjectPath, dst: &ObjectPath) -> FsResult<()> {
    if src.is_root() {
        return Err(FsError::invalid_path(
            src.to_string(),
            "cannot copy or move the bucket root",
        ));
    }
    if src == dst {
        return Err(FsError::invalid_path(
            dst.to_string(),
            "source and destination are the same path",
        ));
    }
    if dst.starts_with(src) {
        return Err(FsError::invalid_path(
            dst.to_string(),
            "destination lies inside the source",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemoryStore;
    use bytes::Bytes;

    fn cfg() -> FsConfig {
        FsConfig::default()
    }

    fn path(key: &str) -> ObjectPath {
        ObjectPath::parse("b", key).unwrap()
    }

    fn tree_store() -> MemoryStore {
        let store = MemoryStore::with_bucket("b");
        store.put_raw("b", "dir/", Bytes::new());
        store.put_raw("b", "dir/a.txt", Bytes::from_static(b"alpha"));
        store.put_raw("b", "dir/sub/b.txt", Bytes::from_static(b"beta"));
        store
    }

    #[tokio::test]
    async fn copy_file_preserves_contents() {
        let store = MemoryStore::with_bucket("b");
        store.put_raw("b", "src.txt", Bytes::from_static(b"payload"));
        copy_path(&store, &path("src.txt"), &path("dst.txt"), &cfg())
            .await
            .unwrap();
        assert_eq!(store.raw_object("b", "dst.txt").unwrap(), b"payload");
        assert_eq!(store.raw_object("b", "src.txt").unwrap(), b"payload");
    }

    #[tokio::test]
    async fn copy_tree_remaps_every_key() {
        let store = tree_store();
        copy_path(&store, &path("dir"), &path("copy"), &cfg())
            .await
            .unwrap();
        assert_eq!(
            store.keys("b"),
            vec!["copy/", "copy/a.txt", "copy/sub/b.txt", "dir/", "dir/a.txt", "dir/sub/b.txt"]
        );
        assert_eq!(store.raw_object("b", "copy/sub/b.txt").unwrap(), b"beta");
    }

    #[tokio::test]
    async fn copy_into_own_subtree_is_rejected() {
        let store = tree_store();
        let err = copy_path(&store, &path("dir"), &path("dir/sub/nested"), &cfg())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidPath { .. }));
    }

    #[tokio::test]
    async fn large_object_copies_via_multipart_stream() {
        let store = MemoryStore::with_bucket("b");
        let data: Vec<u8> = (0..50u8).collect();
        store.put_raw("b", "big", Bytes::from(data.clone()));

        let cfg = FsConfig {
            large_copy_threshold: 10,
            part_size: 16,
            ..FsConfig::default()
        };
        copy_path(&store, &path("big"), &path("big2"), &cfg)
            .await
            .unwrap();
        assert_eq!(store.raw_object("b", "big2").unwrap(), data);
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn failed_streamed_copy_aborts_its_upload() {
        let store = MemoryStore::with_bucket("b");
        store.put_raw("b", "big", Bytes::from(vec![7u8; 64]));
        store.fail_part_uploads(true);

        let cfg = FsConfig {
            large_copy_threshold: 10,
            part_size: 16,
            ..FsConfig::default()
        };
        let err = copy_path(&store, &path("big"), &path("big2"), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Remote(_)));
        assert_eq!(store.pending_uploads(), 0);
        assert!(store.raw_object("b", "big2").is_none());
    }

    #[tokio::test]
    async fn move_tree_deletes_the_source() {
        let store = tree_store();
        let report = move_path(&store, &path("dir"), &path("moved"), &cfg())
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.moved.len(), 3);
        assert_eq!(
            store.keys("b"),
            vec!["moved/", "moved/a.txt", "moved/sub/b.txt"]
        );
    }

    #[tokio::test]
    async fn move_with_failed_source_delete_leaves_both_sides() {
        let store = tree_store();
        store.fail_delete_of("dir/a.txt");
        let report = move_path(&store, &path("dir"), &path("moved"), &cfg())
            .await
            .unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.copied_source_remains, vec!["dir/a.txt".to_string()]);
        assert!(store.raw_object("b", "dir/a.txt").is_some());
        assert!(store.raw_object("b", "moved/a.txt").is_some());
    }

    #[tokio::test]
    async fn delete_of_non_empty_directory_requires_recursive() {
        let store = tree_store();
        let err = delete_path(&store, &path("dir"), false, &cfg())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::DirectoryNotEmpty(_)));
        // Neither the marker nor the contents may be touched.
        assert!(store.raw_object("b", "dir/").is_some());
        assert!(store.raw_object("b", "dir/a.txt").is_some());
    }

    #[tokio::test]
    async fn recursive_delete_reports_partial_failure_and_retries_clean() {
        let store = tree_store();
        store.fail_delete_of("dir/sub/b.txt");

        let report = delete_path(&store, &path("dir"), true, &cfg())
            .await
            .unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "dir/sub/b.txt");
        assert!(store.raw_object("b", "dir/sub/b.txt").is_some());

        // The injected failure is one-shot, so the retry finishes the job.
        let retry = delete_path(&store, &path("dir"), true, &cfg())
            .await
            .unwrap();
        assert!(retry.is_complete());
        assert!(store.keys("b").is_empty());
    }

    #[tokio::test]
    async fn delete_of_empty_marker_directory_removes_both_key_forms() {
        let store = MemoryStore::with_bucket("b");
        store.put_raw("b", "d/", Bytes::new());

        let report = delete_path(&store, &path("d"), false, &cfg())
            .await
            .unwrap();
        assert!(report.is_complete());
        assert!(store.keys("b").is_empty());
    }
}
