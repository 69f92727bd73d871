//! Directory synthesis over the flat key space.
//!
//! The store has no directory concept; a path is a directory when a
//! zero-byte marker object exists for it or when it is a common prefix of
//! other keys (a *virtual* directory). Listings merge the store's grouped
//! common prefixes with its object contents into one lazy entry sequence,
//! threading continuation tokens internally so pagination is invisible to
//! the caller.
//!
//! Listings are weakly consistent snapshots: each page reflects the store at
//! the moment it was fetched, not a single atomic point.

use crate::client::{ListRequest, ObjectStat, ObjectStoreClient, StoreError};
use crate::error::FsResult;
use crate::path::ObjectPath;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// What kind of filesystem entry a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    /// A directory, whether marker-backed or purely virtual.
    Directory,
}

/// One materialized listing result. Constructed transiently per listing
/// call; never persisted beyond the iteration that produced it.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub path: ObjectPath,
    pub kind: EntryKind,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl DirEntry {
    /// Final path segment.
    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or("")
    }
}

/// How a path resolved against the store.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Resolved {
    /// A regular object with this exact key.
    File(ObjectStat),
    /// A zero-byte marker object with the trailing-separator key.
    DirMarker(ObjectStat),
    /// A directory implied by being a common prefix of other keys.
    VirtualDir,
}

impl Resolved {
    pub(crate) fn kind(&self) -> EntryKind {
        match self {
            Resolved::File(_) => EntryKind::File,
            Resolved::DirMarker(_) | Resolved::VirtualDir => EntryKind::Directory,
        }
    }

    pub(crate) fn is_directory(&self) -> bool {
        self.kind() == EntryKind::Directory
    }
}

/// Resolve what, if anything, exists at `path`.
///
/// Lookup order: exact key, then marker key, then a one-key prefix probe for
/// a virtual directory. An object whose key is simultaneously a prefix of
/// other keys is reported as a directory — the store permits the ambiguity,
/// the filesystem does not, and the directory view wins.
pub(crate) async fn resolve(
    client: &dyn ObjectStoreClient,
    path: &ObjectPath,
) -> FsResult<Option<Resolved>> {
    if path.is_root() {
        // The bucket root always exists.
        return Ok(Some(Resolved::VirtualDir));
    }

    let bucket = path.bucket();
    match client.head(bucket, &path.key()).await {
        Ok(stat) => {
            if has_children(client, path).await? {
                warn!("object `{path}` is shadowed by same-named directory entries");
                return Ok(Some(Resolved::VirtualDir));
            }
            return Ok(Some(Resolved::File(stat)));
        }
        Err(StoreError::NotFound { .. }) => {}
        Err(err) => return Err(err.into()),
    }

    match client.head(bucket, &path.marker_key()).await {
        Ok(stat) => return Ok(Some(Resolved::DirMarker(stat))),
        Err(StoreError::NotFound { .. }) => {}
        Err(err) => return Err(err.into()),
    }

    if has_children(client, path).await? {
        Ok(Some(Resolved::VirtualDir))
    } else {
        Ok(None)
    }
}

/// Short probe: does anything live under `path`'s prefix? Two keys are
/// requested because the directory's own marker sorts first and would
/// otherwise occupy the only result slot.
pub(crate) async fn has_children(
    client: &dyn ObjectStoreClient,
    path: &ObjectPath,
) -> FsResult<bool> {
    let page = client
        .list_objects(
            path.bucket(),
            ListRequest {
                prefix: Some(path.marker_key()),
                delimiter: None,
                continuation_token: None,
                max_keys: 2,
            },
        )
        .await?;

    // The marker itself does not make a directory non-empty.
    let marker = path.marker_key();
    let real_child = page.objects.iter().any(|o| o.key != marker);
    Ok(real_child || !page.common_prefixes.is_empty())
}

/// Lazy, paginated directory listing.
///
/// Not restartable mid-page; re-issue the listing to start over. Entries are
/// produced on demand and deduplicated across pages — a marker object and
/// the common prefix it anchors yield a single directory entry.
pub struct DirStream {
    client: Arc<dyn ObjectStoreClient>,
    dir: ObjectPath,
    prefix: String,
    page_size: usize,
    token: Option<String>,
    pending: VecDeque<DirEntry>,
    seen: HashMap<String, EntryKind>,
    exhausted: bool,
}

impl DirStream {
    pub(crate) fn new(client: Arc<dyn ObjectStoreClient>, dir: ObjectPath, page_size: usize) -> Self {
        let prefix = dir.marker_key();
        Self {
            client,
            dir,
            prefix,
            page_size,
            token: None,
            pending: VecDeque::new(),
            seen: HashMap::new(),
            exhausted: false,
        }
    }

    /// The directory being listed.
    pub fn dir(&self) -> &ObjectPath {
        &self.dir
    }

    /// Next entry, fetching further pages as needed. `Ok(None)` ends the
    /// listing.
    pub async fn next_entry(&mut self) -> FsResult<Option<DirEntry>> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Ok(Some(entry));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    /// Drain the remaining entries. Mostly useful in tests and small trees.
    pub async fn collect_entries(mut self) -> FsResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn fetch_page(&mut self) -> FsResult<()> {
        let page = self
            .client
            .list_objects(
                self.dir.bucket(),
                ListRequest {
                    prefix: Some(self.prefix.clone()),
                    delimiter: Some("/".into()),
                    continuation_token: self.token.take(),
                    max_keys: self.page_size,
                },
            )
            .await?;

        if page.is_truncated {
            self.token = page.next_continuation_token;
            if self.token.is_none() {
                self.exhausted = true;
            }
        } else {
            self.exhausted = true;
        }

        // Directories first: within a page the grouped prefixes are the
        // authoritative directory set, and files shadowed by them must be
        // suppressed.
        for common_prefix in &page.common_prefixes {
            let Some(rel) = common_prefix.strip_prefix(&self.prefix) else {
                continue;
            };
            let name = rel.trim_end_matches('/');
            if !name.is_empty() {
                self.push_directory(name);
            }
        }

        for object in page.objects {
            let Some(rel) = object.key.strip_prefix(&self.prefix) else {
                continue;
            };
            if rel.is_empty() {
                // The listed directory's own marker.
                continue;
            }
            if let Some(name) = rel.strip_suffix('/') {
                if !name.contains('/') {
                    self.push_directory(name);
                }
            } else if let Some((first, _)) = rel.split_once('/') {
                // Store ignored the delimiter; synthesize the group.
                self.push_directory(first);
            } else {
                self.push_file(rel.to_string(), object);
            }
        }

        Ok(())
    }

    fn push_directory(&mut self, name: &str) {
        match self.seen.get(name) {
            Some(EntryKind::Directory) => {}
            Some(EntryKind::File) => {
                // The file form was seen earlier; the directory view wins if
                // the entry has not been handed out yet.
                warn!(
                    "object `{}` under `{}` is shadowed by a same-named directory",
                    name, self.dir
                );
                self.seen.insert(name.to_string(), EntryKind::Directory);
                let position = self
                    .pending
                    .iter()
                    .position(|e| e.kind == EntryKind::File && e.name() == name);
                if let Some(position) = position {
                    self.pending.remove(position);
                    self.pending.push_back(self.directory_entry(name));
                }
            }
            None => {
                self.seen.insert(name.to_string(), EntryKind::Directory);
                let entry = self.directory_entry(name);
                self.pending.push_back(entry);
            }
        }
    }

    fn push_file(&mut self, name: String, stat: ObjectStat) {
        match self.seen.get(name.as_str()) {
            Some(EntryKind::Directory) => {
                warn!(
                    "object `{}` under `{}` is shadowed by a same-named directory",
                    name, self.dir
                );
            }
            Some(EntryKind::File) => {}
            None => {
                let entry = DirEntry {
                    path: self.dir.child(&name),
                    kind: EntryKind::File,
                    size: stat.size,
                    last_modified: Some(stat.last_modified),
                };
                self.seen.insert(name, EntryKind::File);
                self.pending.push_back(entry);
            }
        }
    }

    fn directory_entry(&self, name: &str) -> DirEntry {
        DirEntry {
            path: self.dir.child(name),
            kind: EntryKind::Directory,
            size: 0,
            last_modified: None,
        }
    }
}

impl fmt::Debug for DirStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirStream")
            .field("dir", &self.dir)
            .field("page_size", &self.page_size)
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemoryStore;
    use bytes::Bytes;

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::with_bucket("test"));
        for key in ["a/", "a/x", "a/y", "b.txt"] {
            if key.ends_with('/') {
                store.put_raw("test", key, Bytes::new());
            } else {
                store.put_raw("test", key, Bytes::from_static(b"data"));
            }
        }
        store
    }

    #[tokio::test]
    async fn marker_and_contents_merge_without_duplicates() {
        let store = seeded_store().await;
        for page_size in [1usize, 100] {
            let root = ObjectPath::root("test");
            let stream = DirStream::new(store.clone(), root, page_size);
            let entries = stream.collect_entries().await.unwrap();
            let names: Vec<_> = entries.iter().map(|e| e.name().to_string()).collect();
            assert_eq!(
                names,
                vec!["a".to_string(), "b.txt".to_string()],
                "page_size {page_size}"
            );
            assert_eq!(entries[0].kind, EntryKind::Directory);
            assert_eq!(entries[1].kind, EntryKind::File);
        }
    }

    #[tokio::test]
    async fn subdirectory_listing_strips_prefix() {
        let store = seeded_store().await;
        let dir = ObjectPath::parse("test", "a").unwrap();
        let stream = DirStream::new(store.clone(), dir, 1);
        let entries = stream.collect_entries().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
        assert!(entries.iter().all(|e| e.kind == EntryKind::File));
    }

    #[tokio::test]
    async fn resolve_distinguishes_marker_virtual_and_file() {
        let store = seeded_store().await;
        let marker_dir = ObjectPath::parse("test", "a").unwrap();
        assert!(matches!(
            resolve(store.as_ref(), &marker_dir).await.unwrap(),
            Some(Resolved::VirtualDir) | Some(Resolved::DirMarker(_))
        ));

        let file = ObjectPath::parse("test", "b.txt").unwrap();
        assert!(matches!(
            resolve(store.as_ref(), &file).await.unwrap(),
            Some(Resolved::File(_))
        ));

        let missing = ObjectPath::parse("test", "nope").unwrap();
        assert_eq!(resolve(store.as_ref(), &missing).await.unwrap(), None);
    }

    #[tokio::test]
    async fn object_that_is_also_prefix_resolves_as_directory() {
        let store = Arc::new(MemoryStore::with_bucket("test"));
        store.put_raw("test", "both", Bytes::from_static(b"file"));
        store.put_raw("test", "both/child", Bytes::from_static(b"child"));

        let path = ObjectPath::parse("test", "both").unwrap();
        let resolved = resolve(store.as_ref(), &path).await.unwrap().unwrap();
        assert!(resolved.is_directory());
    }

    #[tokio::test]
    async fn marker_directory_with_children_is_non_empty() {
        let store = Arc::new(MemoryStore::with_bucket("test"));
        store.put_raw("test", "full/", Bytes::new());
        store.put_raw("test", "full/child", Bytes::from_static(b"x"));

        // The marker sorts before the child; the probe must see past it.
        let path = ObjectPath::parse("test", "full").unwrap();
        assert!(has_children(store.as_ref(), &path).await.unwrap());
    }

    #[tokio::test]
    async fn dir_stream_debug_names_the_directory() {
        let store = Arc::new(MemoryStore::with_bucket("test"));
        let stream = DirStream::new(store, ObjectPath::root("test"), 10);
        let rendered = format!("{stream:?}");
        assert!(rendered.contains("DirStream"));
        assert!(rendered.contains("test"));
    }

    #[tokio::test]
    async fn empty_marker_directory_has_no_children() {
        let store = Arc::new(MemoryStore::with_bucket("test"));
        store.put_raw("test", "empty/", Bytes::new());

        let path = ObjectPath::parse("test", "empty").unwrap();
        assert!(!has_children(store.as_ref(), &path).await.unwrap());
        assert!(matches!(
            resolve(store.as_ref(), &path).await.unwrap(),
            Some(Resolved::DirMarker(_))
        ));
    }
}
