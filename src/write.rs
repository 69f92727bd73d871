//! Buffered writes over whole-object storage.
//!
//! All writes land in a local staging window first: memory up to a
//! threshold, spilling to an anonymous temporary file beyond it. On a fresh
//! channel no remote call happens until the staged size crosses the
//! multipart part size — at that point completed parts stream out while the
//! current tail stays mutable — or until close, which commits the object
//! with a single PUT or a multipart-complete. A channel reopened over
//! existing content defers all part flushing to close instead, so every
//! preloaded byte stays rewritable for the life of the session.
//!
//! Once parts have been flushed their byte range is immutable; positioned
//! writes and truncates below the flushed watermark are rejected. A part
//! failure always aborts the multipart upload before the error surfaces, so
//! no orphaned upload state is left behind.

use crate::cache::AttrCache;
use crate::client::{CompletedPart, ObjectStoreClient, PutOptions, StoreError};
use crate::error::{FsError, FsResult};
use crate::path::ObjectPath;
use bytes::Bytes;
use std::fmt;
use std::io::{self, SeekFrom};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Where the mutable tail of the object currently lives.
enum Staging {
    Memory(Vec<u8>),
    Spilled(File),
}

struct MultipartState {
    upload_id: String,
    parts: Vec<CompletedPart>,
}

/// A positioned write session over one object.
///
/// State machine: open (clean) → open (dirty) → [parts flushing] → closed.
/// The close transition is the only point that commits the final object.
pub struct WriteChannel {
    client: Arc<dyn ObjectStoreClient>,
    cache: Arc<AttrCache>,
    path: ObjectPath,
    opts: PutOptions,
    part_size: usize,
    staging_threshold: usize,
    max_parts: u32,
    staging: Staging,
    /// Bytes in the staged window.
    len: usize,
    /// Bytes already uploaded as completed parts.
    flushed: u64,
    upload: Option<MultipartState>,
    dirty: bool,
    closed: bool,
    /// Fresh channels stream parts as soon as the window crosses the part
    /// size; preloaded channels defer flushing to close so existing bytes
    /// stay rewritable.
    flush_on_write: bool,
    /// Close with no writes still creates a zero-length object when the
    /// caller explicitly asked for a create.
    create_requested: bool,
}

impl WriteChannel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: Arc<dyn ObjectStoreClient>,
        cache: Arc<AttrCache>,
        path: ObjectPath,
        opts: PutOptions,
        part_size: usize,
        staging_threshold: usize,
        max_parts: u32,
        create_requested: bool,
    ) -> Self {
        Self {
            client,
            cache,
            path,
            opts,
            part_size,
            staging_threshold,
            max_parts,
            staging: Staging::Memory(Vec::new()),
            len: 0,
            flushed: 0,
            upload: None,
            dirty: false,
            closed: false,
            flush_on_write: true,
            create_requested,
        }
    }

    /// Logical size of the object as staged so far.
    pub fn size(&self) -> u64 {
        self.flushed + self.len as u64
    }

    /// Write `buf` at absolute `position`. Gaps between the current end and
    /// `position` read back as zeros. Writing below the flushed watermark
    /// fails: those bytes have already left as multipart parts.
    pub async fn write(&mut self, buf: &[u8], position: u64) -> FsResult<usize> {
        if self.closed {
            return Err(FsError::ClosedChannel);
        }
        if position < self.flushed {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "position precedes already-uploaded multipart parts",
            )));
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let offset = (position - self.flushed) as usize;
        self.stage_at(offset, buf).await?;
        self.dirty = true;

        if matches!(self.staging, Staging::Memory(_)) && self.len > self.staging_threshold {
            self.spill().await?;
        }
        while self.flush_on_write && self.len >= self.part_size {
            self.flush_part().await?;
        }

        Ok(buf.len())
    }

    /// Truncate or zero-extend the object to `size`. Sizes below the
    /// flushed watermark are rejected.
    pub async fn truncate(&mut self, size: u64) -> FsResult<()> {
        if self.closed {
            return Err(FsError::ClosedChannel);
        }
        if size < self.flushed {
            return Err(FsError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot truncate into already-uploaded multipart parts",
            )));
        }

        let window_len = (size - self.flushed) as usize;
        match &mut self.staging {
            Staging::Memory(buf) => buf.resize(window_len, 0),
            Staging::Spilled(file) => file.set_len(window_len as u64).await?,
        }
        self.len = window_len;
        self.dirty = true;
        Ok(())
    }

    /// Commit the object. A single PUT when no parts were flushed, a final
    /// part plus multipart-complete otherwise. Double close is a no-op.
    pub async fn close(&mut self) -> FsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.upload.is_none() && !self.dirty && !self.create_requested {
            return Ok(());
        }

        // Flush anything deferred during preload, part by part, so memory
        // stays bounded by the part size.
        while self.len >= self.part_size {
            self.flush_part().await?;
        }

        if self.upload.is_none() {
            let body = self.window_bytes(0, self.len).await?;
            let result = self
                .client
                .put(self.path.bucket(), &self.path.key(), body, self.opts.clone())
                .await;
            return match result {
                Ok(()) => {
                    self.invalidate();
                    Ok(())
                }
                Err(source) => Err(self.write_failed(source)),
            };
        }

        // Final part may be smaller than the store's part-size minimum.
        if self.len > 0 {
            if let Err(err) = self.upload_one_part().await {
                self.abort_upload().await;
                return Err(err);
            }
        }

        let Some(state) = self.upload.take() else {
            return Ok(());
        };
        let result = self
            .client
            .complete_multipart_upload(
                self.path.bucket(),
                &self.path.key(),
                &state.upload_id,
                state.parts,
            )
            .await;
        match result {
            Ok(()) => {
                debug!("completed multipart upload for {}", self.path);
                self.invalidate();
                Ok(())
            }
            Err(source) => {
                self.upload = Some(MultipartState {
                    upload_id: state.upload_id,
                    parts: Vec::new(),
                });
                self.abort_upload().await;
                Err(self.write_failed(source))
            }
        }
    }

    /// Cooperative cancellation: abort any in-flight multipart upload and
    /// discard the staged data.
    pub async fn abort(&mut self) -> FsResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.abort_upload().await;
        self.staging = Staging::Memory(Vec::new());
        self.len = 0;
        self.dirty = false;
        Ok(())
    }

    async fn flush_part(&mut self) -> FsResult<()> {
        if let Some(state) = &self.upload {
            if state.parts.len() as u32 >= self.max_parts {
                return Err(FsError::Io(io::Error::other(
                    "maximum number of upload parts reached",
                )));
            }
        }

        if self.upload.is_none() {
            let upload_id = self
                .client
                .create_multipart_upload(self.path.bucket(), &self.path.key(), self.opts.clone())
                .await
                .map_err(|source| {
                    self.closed = true;
                    FsError::WriteFailed {
                        key: self.path.key(),
                        source,
                    }
                })?;
            self.upload = Some(MultipartState {
                upload_id,
                parts: Vec::new(),
            });
        }

        let body = self.window_bytes(0, self.part_size).await?;
        let Some(state) = self.upload.as_ref() else {
            return Ok(());
        };
        let upload_id = state.upload_id.clone();
        let part_number = state.parts.len() as u32 + 1;
        debug!(
            "uploading part {} ({} bytes) for {}",
            part_number,
            body.len(),
            self.path
        );
        let etag = self
            .client
            .upload_part(
                self.path.bucket(),
                &self.path.key(),
                &upload_id,
                part_number,
                body,
            )
            .await;
        match etag {
            Ok(etag) => {
                if let Some(state) = self.upload.as_mut() {
                    state.parts.push(CompletedPart { part_number, etag });
                }
                self.drop_window_prefix(self.part_size).await?;
                self.flushed += self.part_size as u64;
                Ok(())
            }
            Err(source) => {
                self.closed = true;
                self.abort_upload().await;
                Err(self.write_failed(source))
            }
        }
    }

    /// Upload the remaining tail as one final part.
    async fn upload_one_part(&mut self) -> FsResult<()> {
        let body = self.window_bytes(0, self.len).await?;
        let Some(state) = self.upload.as_ref() else {
            return Ok(());
        };
        let upload_id = state.upload_id.clone();
        let part_number = state.parts.len() as u32 + 1;
        let etag = self
            .client
            .upload_part(
                self.path.bucket(),
                &self.path.key(),
                &upload_id,
                part_number,
                body,
            )
            .await
            .map_err(|source| FsError::WriteFailed {
                key: self.path.key(),
                source,
            })?;
        if let Some(state) = self.upload.as_mut() {
            state.parts.push(CompletedPart { part_number, etag });
        }
        self.len = 0;
        Ok(())
    }

    async fn abort_upload(&mut self) {
        let Some(state) = self.upload.take() else {
            return;
        };
        debug!("aborting multipart upload {} for {}", state.upload_id, self.path);
        if let Err(err) = self
            .client
            .abort_multipart_upload(self.path.bucket(), &self.path.key(), &state.upload_id)
            .await
        {
            warn!("failed to abort multipart upload {}: {err}", state.upload_id);
        }
    }

    /// Append existing object content to the staging window without marking
    /// the channel dirty. Called repeatedly with consecutive windows of the
    /// object; nothing is uploaded until close, so the whole object stays
    /// rewritable.
    pub(crate) async fn preload(&mut self, data: &[u8]) -> FsResult<()> {
        self.flush_on_write = false;
        let offset = self.len;
        self.stage_at(offset, data).await?;
        if matches!(self.staging, Staging::Memory(_)) && self.len > self.staging_threshold {
            self.spill().await?;
        }
        Ok(())
    }

    async fn stage_at(&mut self, offset: usize, buf: &[u8]) -> FsResult<()> {
        match &mut self.staging {
            Staging::Memory(window) => {
                let end = offset + buf.len();
                if window.len() < end {
                    window.resize(end, 0);
                }
                window[offset..end].copy_from_slice(buf);
            }
            Staging::Spilled(file) => {
                // Seeking past the current end leaves a hole that reads as
                // zeros, matching the memory path's gap fill.
                file.seek(SeekFrom::Start(offset as u64)).await?;
                file.write_all(buf).await?;
                file.flush().await?;
            }
        }
        self.len = self.len.max(offset + buf.len());
        Ok(())
    }

    async fn spill(&mut self) -> FsResult<()> {
        let Staging::Memory(window) = &mut self.staging else {
            return Ok(());
        };
        debug!(
            "spilling {} staged bytes to temporary storage for {}",
            window.len(),
            self.path
        );
        let mut file = File::from_std(tempfile::tempfile()?);
        file.write_all(window).await?;
        file.flush().await?;
        self.staging = Staging::Spilled(file);
        Ok(())
    }

    async fn window_bytes(&mut self, offset: usize, count: usize) -> FsResult<Bytes> {
        let count = count.min(self.len.saturating_sub(offset));
        match &mut self.staging {
            Staging::Memory(window) => Ok(Bytes::copy_from_slice(&window[offset..offset + count])),
            Staging::Spilled(file) => {
                let mut out = vec![0u8; count];
                file.seek(SeekFrom::Start(offset as u64)).await?;
                file.read_exact(&mut out).await?;
                Ok(Bytes::from(out))
            }
        }
    }

    async fn drop_window_prefix(&mut self, count: usize) -> FsResult<()> {
        match &mut self.staging {
            Staging::Memory(window) => {
                window.drain(..count);
            }
            Staging::Spilled(file) => {
                let remaining = self.len - count;
                let mut tail = vec![0u8; remaining];
                file.seek(SeekFrom::Start(count as u64)).await?;
                file.read_exact(&mut tail).await?;
                file.seek(SeekFrom::Start(0)).await?;
                file.write_all(&tail).await?;
                file.set_len(remaining as u64).await?;
                file.flush().await?;
            }
        }
        self.len -= count;
        Ok(())
    }

    fn invalidate(&self) {
        self.cache.invalidate(self.path.bucket(), &self.path.key());
    }

    fn write_failed(&self, source: StoreError) -> FsError {
        FsError::WriteFailed {
            key: self.path.key(),
            source,
        }
    }
}

impl fmt::Debug for WriteChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteChannel")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("flushed", &self.flushed)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Drop for WriteChannel {
    fn drop(&mut self) {
        if !self.closed && (self.dirty || self.upload.is_some()) {
            warn!(
                "write channel for {} dropped without close; staged data discarded",
                self.path
            );
        }
    }
}
