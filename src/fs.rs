//! The filesystem facade.
//!
//! One [`ObjectFs`] wraps one bucket of one store and presents it as a
//! hierarchical filesystem: paths instead of keys, directories synthesized
//! from markers and common prefixes, channels for positioned I/O, and
//! POSIX-flavored attributes layered over object metadata. All methods take
//! plain path strings and normalize them through [`ObjectPath`].

use crate::attr::{self, FileAttributes, PosixAttributes, MODE_META_KEY, OWNER_META_KEY};
use crate::cache::AttrCache;
use crate::client::{ObjectStoreClient, PutOptions};
use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::list::{self, DirStream, Resolved};
use crate::ops::{self, BulkDeleteReport, MoveReport};
use crate::path::ObjectPath;
use crate::read::ReadChannel;
use crate::write::WriteChannel;
use std::io;
use std::sync::Arc;
use tracing::debug;

/// Content type attached to directory marker objects.
const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";

/// How [`ObjectFs::open_write`] treats the target.
///
/// Mirrors the usual open-flag semantics: `create` opens-or-creates,
/// `create_new` insists the target not exist, `truncate` discards existing
/// content, `append` positions the caller at the current end. `append` and
/// `truncate` are mutually exclusive.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
    pub append: bool,
    /// Content type for the committed object. Falls back to the existing
    /// object's type, then to a guess from the file extension.
    pub content_type: Option<String>,
}

impl WriteOptions {
    /// Open-or-create, keeping existing content.
    pub fn create() -> Self {
        Self {
            create: true,
            ..Self::default()
        }
    }

    /// Open-or-create, discarding existing content.
    pub fn create_truncate() -> Self {
        Self {
            create: true,
            truncate: true,
            ..Self::default()
        }
    }
}

/// A bucket presented as a filesystem.
pub struct ObjectFs {
    client: Arc<dyn ObjectStoreClient>,
    bucket: String,
    config: FsConfig,
    cache: Arc<AttrCache>,
}

impl ObjectFs {
    pub fn new(
        client: Arc<dyn ObjectStoreClient>,
        bucket: impl Into<String>,
        config: FsConfig,
    ) -> Self {
        let config = config.normalized();
        let cache = Arc::new(AttrCache::new(config.cache_ttl));
        Self {
            client,
            bucket: bucket.into(),
            config,
            cache,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Normalize a raw path string against this filesystem's bucket.
    pub fn path(&self, raw: &str) -> FsResult<ObjectPath> {
        ObjectPath::parse(self.bucket.clone(), raw)
    }

    /// Drop all cached lookups. The next access of any path hits the store.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn resolve_cached(&self, path: &ObjectPath) -> FsResult<Option<Resolved>> {
        let key = path.key();
        if let Some(cached) = self.cache.lookup(&self.bucket, &key) {
            return Ok(cached);
        }
        let resolved = list::resolve(self.client.as_ref(), path).await?;
        self.cache.insert(&self.bucket, &key, resolved.clone());
        Ok(resolved)
    }

    pub async fn exists(&self, raw: &str) -> FsResult<bool> {
        let path = self.path(raw)?;
        Ok(self.resolve_cached(&path).await?.is_some())
    }

    pub async fn is_directory(&self, raw: &str) -> FsResult<bool> {
        let path = self.path(raw)?;
        Ok(self
            .resolve_cached(&path)
            .await?
            .is_some_and(|r| r.is_directory()))
    }

    /// Basic attributes of the entry at `raw`.
    pub async fn read_attributes(&self, raw: &str) -> FsResult<FileAttributes> {
        let path = self.path(raw)?;
        match self.resolve_cached(&path).await? {
            Some(resolved) => Ok(attr::file_attributes(&resolved)),
            None => Err(FsError::NoSuchFile(path.to_string())),
        }
    }

    /// POSIX-flavored attributes of the entry at `raw`, with configured
    /// defaults where the object carries no ownership metadata.
    pub async fn posix_attributes(&self, raw: &str) -> FsResult<PosixAttributes> {
        let path = self.path(raw)?;
        match self.resolve_cached(&path).await? {
            Some(resolved) => Ok(attr::posix_attributes(&resolved, &self.config)),
            None => Err(FsError::NoSuchFile(path.to_string())),
        }
    }

    /// Verify the entry grants read (and optionally write) access according
    /// to its permission bits.
    pub async fn check_access(&self, raw: &str, write: bool) -> FsResult<()> {
        let attrs = self.posix_attributes(raw).await?;
        if !attrs.is_readable() || (write && !attrs.is_writable()) {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("access to `{raw}` denied by mode {}", attrs.mode_string()),
            )));
        }
        Ok(())
    }

    /// Open a read channel over the file at `raw`.
    pub async fn open_read(&self, raw: &str) -> FsResult<ReadChannel> {
        let path = self.path(raw)?;
        match self.resolve_cached(&path).await? {
            None => Err(FsError::NoSuchFile(path.to_string())),
            Some(Resolved::DirMarker(_)) | Some(Resolved::VirtualDir) => {
                Err(FsError::IsADirectory(path.to_string()))
            }
            Some(Resolved::File(stat)) => Ok(ReadChannel::new(
                self.client.clone(),
                path,
                stat.size,
                self.config.read_window,
            )),
        }
    }

    /// Open a write channel over the file at `raw` per `opts`. Existing
    /// content is staged into the channel unless `truncate` is set, so
    /// positioned writes see the current bytes.
    pub async fn open_write(&self, raw: &str, opts: WriteOptions) -> FsResult<WriteChannel> {
        if opts.append && opts.truncate {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "append and truncate are mutually exclusive",
            )));
        }

        let path = self.path(raw)?;
        let existing = match self.resolve_cached(&path).await? {
            Some(Resolved::DirMarker(_)) | Some(Resolved::VirtualDir) => {
                return Err(FsError::IsADirectory(path.to_string()));
            }
            Some(Resolved::File(stat)) => {
                if opts.create_new {
                    return Err(FsError::FileAlreadyExists(path.to_string()));
                }
                Some(stat)
            }
            None => {
                if !opts.create && !opts.create_new {
                    return Err(FsError::NoSuchFile(path.to_string()));
                }
                None
            }
        };

        let content_type = opts
            .content_type
            .clone()
            .or_else(|| existing.as_ref().and_then(|s| s.content_type.clone()))
            .or_else(|| attr::guess_content_type(&path));
        let metadata = existing
            .as_ref()
            .map(|s| s.metadata.clone())
            .unwrap_or_default();

        // A truncating open of an existing file must commit even when
        // nothing is written afterwards.
        let create_requested = existing.is_none() || opts.truncate;

        let mut channel = WriteChannel::new(
            self.client.clone(),
            self.cache.clone(),
            path.clone(),
            PutOptions {
                content_type,
                metadata,
            },
            self.config.part_size,
            self.config.staging_threshold,
            self.config.max_parts,
            create_requested,
        );

        if let Some(stat) = existing {
            if !opts.truncate && stat.size > 0 {
                // Ranged windows keep peak memory independent of the
                // object size; the channel spills to disk as it grows.
                let window = self.config.read_window as u64;
                let mut offset = 0u64;
                while offset < stat.size {
                    let last = (offset + window).min(stat.size) - 1;
                    let body = self
                        .client
                        .get(&self.bucket, &path.key(), Some((offset, last)))
                        .await
                        .map_err(|err| FsError::from_lookup(err, &path.to_string()))?;
                    channel.preload(&body).await?;
                    offset = last + 1;
                }
            }
        }

        Ok(channel)
    }

    /// Read a whole file into memory.
    pub async fn read(&self, raw: &str) -> FsResult<Vec<u8>> {
        let mut channel = self.open_read(raw).await?;
        let size = channel.size();
        let body = channel.read_at(0, size as usize).await?;
        channel.close();
        Ok(body)
    }

    /// Create or replace a whole file in one call.
    pub async fn write(&self, raw: &str, data: &[u8]) -> FsResult<()> {
        let mut channel = self.open_write(raw, WriteOptions::create_truncate()).await?;
        channel.write(data, 0).await?;
        channel.close().await
    }

    /// Create a directory at `raw`. With markers enabled this writes a
    /// zero-byte marker object; otherwise the directory stays virtual and
    /// the call only validates the path.
    pub async fn create_directory(&self, raw: &str) -> FsResult<()> {
        let path = self.path(raw)?;
        if self.resolve_cached(&path).await?.is_some() {
            return Err(FsError::FileAlreadyExists(path.to_string()));
        }
        if !self.config.create_directory_markers {
            debug!("directory markers disabled; `{path}` stays virtual");
            self.cache.invalidate(&self.bucket, &path.key());
            return Ok(());
        }

        self.client
            .put(
                &self.bucket,
                &path.marker_key(),
                bytes::Bytes::new(),
                PutOptions {
                    content_type: Some(DIRECTORY_CONTENT_TYPE.to_string()),
                    metadata: Default::default(),
                },
            )
            .await?;
        self.cache.invalidate(&self.bucket, &path.key());
        Ok(())
    }

    /// List the directory at `raw` as a lazy entry stream.
    pub async fn list_dir(&self, raw: &str) -> FsResult<DirStream> {
        let path = self.path(raw)?;
        match self.resolve_cached(&path).await? {
            None => Err(FsError::NoSuchFile(path.to_string())),
            Some(Resolved::File(_)) => Err(FsError::NotADirectory(path.to_string())),
            Some(_) => Ok(DirStream::new(
                self.client.clone(),
                path,
                self.config.list_page_size,
            )),
        }
    }

    /// Copy a file or tree. Refuses to overwrite an existing destination
    /// unless `replace` is set.
    pub async fn copy(&self, src: &str, dst: &str, replace: bool) -> FsResult<()> {
        let src = self.path(src)?;
        let dst = self.path(dst)?;
        if !replace && self.resolve_cached(&dst).await?.is_some() {
            return Err(FsError::FileAlreadyExists(dst.to_string()));
        }
        ops::copy_path(self.client.as_ref(), &src, &dst, &self.config).await?;
        self.cache.invalidate_prefix(&self.bucket, &dst.key());
        Ok(())
    }

    /// Move a file or tree. Not atomic; the report lists which keys moved,
    /// which were copied but remain at the source, and which failed.
    pub async fn rename(&self, src: &str, dst: &str, replace: bool) -> FsResult<MoveReport> {
        let src = self.path(src)?;
        let dst = self.path(dst)?;
        if !replace && self.resolve_cached(&dst).await?.is_some() {
            return Err(FsError::FileAlreadyExists(dst.to_string()));
        }
        let report = ops::move_path(self.client.as_ref(), &src, &dst, &self.config).await?;
        self.cache.invalidate_prefix(&self.bucket, &src.key());
        self.cache.invalidate_prefix(&self.bucket, &dst.key());
        Ok(report)
    }

    /// Delete a file or an empty directory.
    pub async fn delete(&self, raw: &str) -> FsResult<()> {
        let path = self.path(raw)?;
        let report = ops::delete_path(self.client.as_ref(), &path, false, &self.config).await?;
        self.cache.invalidate(&self.bucket, &path.key());
        report.into_result().map(|_| ())
    }

    /// Delete a whole subtree. Partial failure is reported, not rolled
    /// back; retrying deletes the remainder.
    pub async fn delete_recursive(&self, raw: &str) -> FsResult<BulkDeleteReport> {
        let path = self.path(raw)?;
        let report = ops::delete_path(self.client.as_ref(), &path, true, &self.config).await?;
        self.cache.invalidate_prefix(&self.bucket, &path.key());
        Ok(report)
    }

    /// Record a new owner in the object's metadata.
    pub async fn set_owner(&self, raw: &str, owner: &str) -> FsResult<()> {
        self.replace_metadata(raw, |opts| {
            opts.metadata.insert(OWNER_META_KEY.into(), owner.into());
        })
        .await
    }

    /// Record new permission bits in the object's metadata.
    pub async fn set_permissions(&self, raw: &str, mode: u32) -> FsResult<()> {
        self.replace_metadata(raw, |opts| {
            opts.metadata
                .insert(MODE_META_KEY.into(), format!("{mode:o}"));
        })
        .await
    }

    /// Replace the object's content type.
    pub async fn set_content_type(&self, raw: &str, content_type: &str) -> FsResult<()> {
        self.replace_metadata(raw, |opts| {
            opts.content_type = Some(content_type.to_string());
        })
        .await
    }

    /// Metadata-only rewrite: a copy onto the same key with replaced
    /// metadata. Virtual directories have no backing object to rewrite.
    async fn replace_metadata(
        &self,
        raw: &str,
        mutate: impl FnOnce(&mut PutOptions),
    ) -> FsResult<()> {
        let path = self.path(raw)?;
        let stat = match self.resolve_cached(&path).await? {
            None => return Err(FsError::NoSuchFile(path.to_string())),
            Some(Resolved::VirtualDir) => {
                return Err(FsError::Io(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("`{path}` is a virtual directory with no backing object"),
                )));
            }
            Some(Resolved::File(stat)) | Some(Resolved::DirMarker(stat)) => stat,
        };

        let mut opts = PutOptions {
            content_type: stat.content_type.clone(),
            metadata: stat.metadata.clone(),
        };
        mutate(&mut opts);

        // stat.key carries the literal store key, marker form included.
        self.client
            .copy_object(&self.bucket, &stat.key, &self.bucket, &stat.key, Some(opts))
            .await?;
        self.cache.invalidate(&self.bucket, &path.key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::EntryKind;
    use crate::mem::MemoryStore;
    use std::time::Duration;

    fn fs() -> (Arc<MemoryStore>, ObjectFs) {
        let store = Arc::new(MemoryStore::with_bucket("b"));
        let config = FsConfig {
            cache_ttl: Duration::from_millis(0),
            ..FsConfig::default()
        };
        let fs = ObjectFs::new(store.clone(), "b", config);
        (store, fs)
    }

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let (_, fs) = fs();
        fs.write("docs/note.txt", b"contents").await.unwrap();
        assert_eq!(fs.read("docs/note.txt").await.unwrap(), b"contents");
        assert!(fs.is_directory("docs").await.unwrap());
    }

    #[tokio::test]
    async fn create_directory_and_marker_round_trip() {
        let (store, fs) = fs();
        fs.create_directory("a/b").await.unwrap();
        assert!(fs.is_directory("a/b").await.unwrap());
        assert_eq!(store.keys("b"), vec!["a/b/"]);

        let err = fs.create_directory("a/b").await.unwrap_err();
        assert!(matches!(err, FsError::FileAlreadyExists(_)));

        fs.delete("a/b").await.unwrap();
        assert!(store.keys("b").is_empty());
        assert!(!fs.exists("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn open_write_honors_create_flags() {
        let (_, fs) = fs();
        let missing = fs.open_write("nope", WriteOptions::default()).await;
        assert!(matches!(missing, Err(FsError::NoSuchFile(_))));

        fs.write("exists", b"x").await.unwrap();
        let clash = fs
            .open_write(
                "exists",
                WriteOptions {
                    create_new: true,
                    ..WriteOptions::default()
                },
            )
            .await;
        assert!(matches!(clash, Err(FsError::FileAlreadyExists(_))));
    }

    #[tokio::test]
    async fn reopening_without_truncate_preserves_existing_bytes() {
        let (_, fs) = fs();
        fs.write("f", b"hello world").await.unwrap();

        let mut channel = fs.open_write("f", WriteOptions::create()).await.unwrap();
        channel.write(b"WORLD", 6).await.unwrap();
        channel.close().await.unwrap();

        assert_eq!(fs.read("f").await.unwrap(), b"hello WORLD");
    }

    #[tokio::test]
    async fn reopened_large_file_allows_rewrites_at_the_start() {
        let (store, fs) = fs();
        let mut data = vec![7u8; fs.config().part_size + 1024];
        fs.write("big.bin", &data).await.unwrap();

        let mut channel = fs.open_write("big.bin", WriteOptions::create()).await.unwrap();
        channel.write(b"patched", 0).await.unwrap();
        channel.close().await.unwrap();
        data[..7].copy_from_slice(b"patched");

        assert_eq!(fs.read("big.bin").await.unwrap(), data);
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn append_positions_at_current_end() {
        let (_, fs) = fs();
        fs.write("log", b"one\n").await.unwrap();

        let mut channel = fs
            .open_write(
                "log",
                WriteOptions {
                    create: true,
                    append: true,
                    ..WriteOptions::default()
                },
            )
            .await
            .unwrap();
        let end = channel.size();
        channel.write(b"two\n", end).await.unwrap();
        channel.close().await.unwrap();

        assert_eq!(fs.read("log").await.unwrap(), b"one\ntwo\n");
    }

    #[tokio::test]
    async fn truncating_open_discards_content_even_without_writes() {
        let (_, fs) = fs();
        fs.write("f", b"old content").await.unwrap();
        let mut channel = fs
            .open_write("f", WriteOptions::create_truncate())
            .await
            .unwrap();
        channel.close().await.unwrap();
        assert_eq!(fs.read("f").await.unwrap(), b"");
    }

    #[tokio::test]
    async fn listing_merges_files_and_directories() {
        let (_, fs) = fs();
        fs.write("dir/a.txt", b"a").await.unwrap();
        fs.create_directory("dir/sub").await.unwrap();

        let stream = fs.list_dir("dir").await.unwrap();
        let entries = stream.collect_entries().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name().to_string()).collect();
        assert_eq!(names, vec!["sub".to_string(), "a.txt".to_string()]);
        assert_eq!(entries[0].kind, EntryKind::Directory);

        let err = fs.list_dir("dir/a.txt").await.unwrap_err();
        assert!(matches!(err, FsError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn copy_refuses_existing_destination_without_replace() {
        let (_, fs) = fs();
        fs.write("src", b"new").await.unwrap();
        fs.write("dst", b"old").await.unwrap();

        let err = fs.copy("src", "dst", false).await.unwrap_err();
        assert!(matches!(err, FsError::FileAlreadyExists(_)));

        fs.copy("src", "dst", true).await.unwrap();
        assert_eq!(fs.read("dst").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn rename_moves_file_and_invalidates_lookups() {
        let (_, fs) = fs();
        fs.write("from", b"data").await.unwrap();
        let report = fs.rename("from", "to", false).await.unwrap();
        assert!(report.is_complete());
        assert!(!fs.exists("from").await.unwrap());
        assert_eq!(fs.read("to").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn permissions_round_trip_and_gate_access() {
        let (_, fs) = fs();
        fs.write("guarded", b"x").await.unwrap();
        fs.set_owner("guarded", "alice").await.unwrap();
        fs.set_permissions("guarded", 0o444).await.unwrap();

        let attrs = fs.posix_attributes("guarded").await.unwrap();
        assert_eq!(attrs.owner, "alice");
        assert_eq!(attrs.mode, 0o444);

        fs.check_access("guarded", false).await.unwrap();
        let err = fs.check_access("guarded", true).await.unwrap_err();
        assert!(matches!(err, FsError::Io(_)));

        // Metadata rewrites must not clobber each other.
        let attrs = fs.posix_attributes("guarded").await.unwrap();
        assert_eq!(attrs.owner, "alice");
    }

    #[tokio::test]
    async fn content_type_guessed_and_overridable() {
        let (_, fs) = fs();
        fs.write("page.html", b"<html>").await.unwrap();
        let attrs = fs.read_attributes("page.html").await.unwrap();
        assert_eq!(attrs.content_type.as_deref(), Some("text/html"));

        fs.set_content_type("page.html", "text/plain").await.unwrap();
        let attrs = fs.read_attributes("page.html").await.unwrap();
        assert_eq!(attrs.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn delete_non_empty_directory_requires_recursive() {
        let (store, fs) = fs();
        fs.write("tree/leaf", b"x").await.unwrap();

        let err = fs.delete("tree").await.unwrap_err();
        assert!(matches!(err, FsError::DirectoryNotEmpty(_)));

        let report = fs.delete_recursive("tree").await.unwrap();
        assert!(report.is_complete());
        assert!(store.keys("b").is_empty());
    }
}
