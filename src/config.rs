//! Centralized filesystem configuration.
//!
//! Defaults mirror the limits of S3-compatible stores; every threshold is a
//! tuning knob rather than a constant. `from_env` layers `OBJECTFS_*`
//! environment overrides on top of the defaults.

use std::env;
use std::time::Duration;

/// Minimum size of a non-final multipart part accepted by S3-compatible
/// stores: 5 MiB.
pub const MIN_PART_SIZE: usize = 5 << 20;

/// Maximum number of keys a single `deleteObjects` call may carry.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Configuration for one filesystem instance.
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// Bytes staged in memory by a write channel before spilling to a
    /// temporary file.
    pub staging_threshold: usize,

    /// Multipart part size. Clamped up to [`MIN_PART_SIZE`].
    pub part_size: usize,

    /// Maximum number of parts in one multipart upload.
    pub max_parts: u32,

    /// TTL for the object metadata cache.
    pub cache_ttl: Duration,

    /// Whether `create_directory` materializes zero-byte marker objects.
    /// When disabled, directories exist only as common prefixes.
    pub create_directory_markers: bool,

    /// Owner reported when an object carries no owner metadata.
    pub default_owner: String,

    /// Permission bits reported when an object carries no mode metadata.
    pub default_mode: u32,

    /// Object size above which copy falls back to download-and-reupload
    /// instead of the store's native copy call.
    pub large_copy_threshold: u64,

    /// Read-ahead window for ranged GETs issued by read channels.
    pub read_window: usize,

    /// Keys per `deleteObjects` batch. Clamped to [`MAX_DELETE_BATCH`].
    pub max_delete_batch: usize,

    /// Page size requested from the store when listing directories.
    pub list_page_size: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            staging_threshold: 512 * 1024,
            part_size: MIN_PART_SIZE,
            max_parts: 10_000,
            cache_ttl: Duration::from_secs(1),
            create_directory_markers: true,
            default_owner: "objectfs".into(),
            default_mode: 0o644,
            large_copy_threshold: 5 << 30,
            read_window: 256 * 1024,
            max_delete_batch: MAX_DELETE_BATCH,
            list_page_size: 1000,
        }
    }
}

impl FsConfig {
    /// Defaults overridden by any `OBJECTFS_*` environment variables that
    /// parse cleanly. Unparseable values are logged and skipped.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = read_env_usize("OBJECTFS_STAGING_THRESHOLD") {
            cfg.staging_threshold = v;
        }
        if let Some(v) = read_env_usize("OBJECTFS_PART_SIZE") {
            cfg.part_size = v;
        }
        if let Some(v) = read_env_usize("OBJECTFS_CACHE_TTL_MS") {
            cfg.cache_ttl = Duration::from_millis(v as u64);
        }
        if let Some(v) = read_env_usize("OBJECTFS_READ_WINDOW") {
            cfg.read_window = v;
        }
        if let Ok(v) = env::var("OBJECTFS_DIRECTORY_MARKERS") {
            cfg.create_directory_markers = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Ok(v) = env::var("OBJECTFS_DEFAULT_OWNER") {
            cfg.default_owner = v;
        }

        cfg.normalized()
    }

    /// Clamp fields that have hard store-side limits.
    pub fn normalized(mut self) -> Self {
        self.part_size = self.part_size.max(MIN_PART_SIZE);
        self.max_delete_batch = self.max_delete_batch.clamp(1, MAX_DELETE_BATCH);
        self.list_page_size = self.list_page_size.clamp(1, 1000);
        self.read_window = self.read_window.max(1);
        self
    }
}

fn read_env_usize(name: &str) -> Option<usize> {
    match env::var(name) {
        Ok(value) => match value.parse::<usize>() {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!("ignoring {}=`{}`: {}", name, value, err);
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_normalized() {
        let cfg = FsConfig::default().normalized();
        assert!(cfg.part_size >= MIN_PART_SIZE);
        assert!(cfg.max_delete_batch <= MAX_DELETE_BATCH);
    }

    #[test]
    fn part_size_clamped_to_store_minimum() {
        let cfg = FsConfig {
            part_size: 1024,
            ..FsConfig::default()
        }
        .normalized();
        assert_eq!(cfg.part_size, MIN_PART_SIZE);
    }
}
