//! Random-access reads over whole-object storage.
//!
//! The store only serves ranged GETs, so the channel keeps a read-ahead
//! window: sequential reads are served from the buffered window, and a seek
//! outside it drops the buffer and fetches a fresh range at the new
//! position. The object size is taken once at open and cached for the life
//! of the session; reads past end-of-object return zero bytes, not an
//! error.
//!
//! A channel is exclusively owned by its opener. Independently opened
//! channels on the same key share no state and are safe to drive from
//! separate tasks.

use crate::client::ObjectStoreClient;
use crate::error::{FsError, FsResult};
use crate::path::ObjectPath;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// A positioned read session over one object.
pub struct ReadChannel {
    client: Arc<dyn ObjectStoreClient>,
    path: ObjectPath,
    size: u64,
    position: u64,
    window: usize,
    buffer: Bytes,
    buffer_start: u64,
    open: bool,
}

impl ReadChannel {
    pub(crate) fn new(
        client: Arc<dyn ObjectStoreClient>,
        path: ObjectPath,
        size: u64,
        window: usize,
    ) -> Self {
        Self {
            client,
            path,
            size,
            position: 0,
            window: window.max(1),
            buffer: Bytes::new(),
            buffer_start: 0,
            open: true,
        }
    }

    /// Object size as observed at open.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the read position. Seeking past end-of-object is allowed; the
    /// next read simply returns zero bytes.
    pub fn seek(&mut self, position: u64) -> FsResult<()> {
        if !self.open {
            return Err(FsError::ClosedChannel);
        }
        self.position = position;
        Ok(())
    }

    /// Read into `buf` at the current position, returning the byte count.
    /// Returns 0 at end-of-object or for an empty `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> FsResult<usize> {
        if !self.open {
            return Err(FsError::ClosedChannel);
        }
        if buf.is_empty() || self.position >= self.size {
            return Ok(0);
        }

        if !self.window_covers(self.position) {
            self.fill_window().await?;
        }

        let offset = (self.position - self.buffer_start) as usize;
        let available = self.buffer.len() - offset;
        let count = available.min(buf.len());
        buf[..count].copy_from_slice(&self.buffer[offset..offset + count]);
        self.position += count as u64;
        Ok(count)
    }

    /// Read exactly `len` bytes starting at `position`, short only at
    /// end-of-object. Convenience wrapper over `seek` + `read`.
    pub async fn read_at(&mut self, position: u64, len: usize) -> FsResult<Vec<u8>> {
        self.seek(position)?;
        let mut out = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read(&mut out[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }

    /// Release the session. Double close is a no-op.
    pub fn close(&mut self) {
        self.open = false;
        self.buffer = Bytes::new();
    }

    fn window_covers(&self, position: u64) -> bool {
        !self.buffer.is_empty()
            && position >= self.buffer_start
            && position < self.buffer_start + self.buffer.len() as u64
    }

    async fn fill_window(&mut self) -> FsResult<()> {
        let first = self.position;
        let last = (first + self.window as u64).min(self.size) - 1;
        let body = self
            .client
            .get(self.path.bucket(), &self.path.key(), Some((first, last)))
            .await
            .map_err(|err| FsError::from_lookup(err, &self.path.to_string()))?;
        self.buffer_start = first;
        self.buffer = body;
        Ok(())
    }
}

impl fmt::Debug for ReadChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadChannel")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("position", &self.position)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}
