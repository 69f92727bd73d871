//! Filesystem attribute views over object metadata.
//!
//! The store knows sizes, timestamps and free-form metadata; POSIX-style
//! ownership and permissions are layered on top through well-known metadata
//! keys. Objects written by other tools carry neither, so every POSIX field
//! falls back to a configured default instead of failing.

use crate::client::ObjectStat;
use crate::config::FsConfig;
use crate::list::{EntryKind, Resolved};
use crate::path::ObjectPath;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Metadata key carrying the owner name.
pub const OWNER_META_KEY: &str = "objectfs-owner";

/// Metadata key carrying the permission bits, as an octal string.
pub const MODE_META_KEY: &str = "objectfs-mode";

/// Basic attributes every entry has.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttributes {
    pub kind: EntryKind,
    pub size: u64,
    /// `None` for virtual directories, which have no backing object.
    pub last_modified: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
}

impl FileAttributes {
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// POSIX-flavored attributes synthesized from object metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PosixAttributes {
    pub owner: String,
    /// Permission bits, e.g. `0o644`.
    pub mode: u32,
}

impl PosixAttributes {
    pub fn is_readable(&self) -> bool {
        self.mode & 0o400 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.mode & 0o200 != 0
    }

    /// Render the mode the way it is stored: a short octal string.
    pub fn mode_string(&self) -> String {
        format!("{:o}", self.mode)
    }
}

pub(crate) fn file_attributes(resolved: &Resolved) -> FileAttributes {
    match resolved {
        Resolved::File(stat) => FileAttributes {
            kind: EntryKind::File,
            size: stat.size,
            last_modified: Some(stat.last_modified),
            content_type: stat.content_type.clone(),
            etag: stat.etag.clone(),
        },
        Resolved::DirMarker(stat) => FileAttributes {
            kind: EntryKind::Directory,
            size: 0,
            last_modified: Some(stat.last_modified),
            content_type: None,
            etag: None,
        },
        Resolved::VirtualDir => FileAttributes {
            kind: EntryKind::Directory,
            size: 0,
            last_modified: None,
            content_type: None,
            etag: None,
        },
    }
}

/// Directories are traversable by default, so they gain the execute bits
/// their backing metadata never carries.
pub(crate) fn posix_attributes(resolved: &Resolved, cfg: &FsConfig) -> PosixAttributes {
    let stat = match resolved {
        Resolved::File(stat) | Resolved::DirMarker(stat) => Some(stat),
        Resolved::VirtualDir => None,
    };

    let owner = stat
        .and_then(|s| s.metadata.get(OWNER_META_KEY).cloned())
        .unwrap_or_else(|| cfg.default_owner.clone());

    let mut mode = stat
        .and_then(|s| parse_mode(s))
        .unwrap_or(cfg.default_mode);
    if matches!(resolved, Resolved::DirMarker(_) | Resolved::VirtualDir) {
        mode |= 0o111;
    }

    PosixAttributes { owner, mode }
}

fn parse_mode(stat: &ObjectStat) -> Option<u32> {
    let raw = stat.metadata.get(MODE_META_KEY)?;
    match u32::from_str_radix(raw, 8) {
        Ok(mode) => Some(mode),
        Err(err) => {
            warn!("ignoring malformed mode `{raw}` on `{}`: {err}", stat.key);
            None
        }
    }
}

/// Best-effort MIME type for a new object, from its file name.
pub(crate) fn guess_content_type(path: &ObjectPath) -> Option<String> {
    let name = path.file_name()?;
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stat_with(metadata: HashMap<String, String>) -> ObjectStat {
        ObjectStat {
            key: "k".into(),
            size: 42,
            last_modified: Utc::now(),
            content_type: Some("text/plain".into()),
            etag: Some("abc".into()),
            metadata,
        }
    }

    #[test]
    fn file_attributes_mirror_the_stat() {
        let stat = stat_with(HashMap::new());
        let attrs = file_attributes(&Resolved::File(stat.clone()));
        assert!(attrs.is_file());
        assert_eq!(attrs.size, 42);
        assert_eq!(attrs.content_type.as_deref(), Some("text/plain"));
        assert_eq!(attrs.last_modified, Some(stat.last_modified));
    }

    #[test]
    fn virtual_directories_have_no_timestamp() {
        let attrs = file_attributes(&Resolved::VirtualDir);
        assert!(attrs.is_directory());
        assert_eq!(attrs.size, 0);
        assert!(attrs.last_modified.is_none());
    }

    #[test]
    fn posix_attributes_read_stored_metadata() {
        let metadata = HashMap::from([
            (OWNER_META_KEY.to_string(), "alice".to_string()),
            (MODE_META_KEY.to_string(), "600".to_string()),
        ]);
        let attrs = posix_attributes(&Resolved::File(stat_with(metadata)), &FsConfig::default());
        assert_eq!(attrs.owner, "alice");
        assert_eq!(attrs.mode, 0o600);
        assert!(attrs.is_readable());
        assert!(attrs.is_writable());
    }

    #[test]
    fn missing_or_malformed_metadata_falls_back_to_defaults() {
        let cfg = FsConfig::default();

        let bare = posix_attributes(&Resolved::File(stat_with(HashMap::new())), &cfg);
        assert_eq!(bare.owner, cfg.default_owner);
        assert_eq!(bare.mode, cfg.default_mode);

        let bad = HashMap::from([(MODE_META_KEY.to_string(), "not-octal".to_string())]);
        let attrs = posix_attributes(&Resolved::File(stat_with(bad)), &cfg);
        assert_eq!(attrs.mode, cfg.default_mode);
    }

    #[test]
    fn directories_gain_execute_bits() {
        let cfg = FsConfig::default();
        let attrs = posix_attributes(&Resolved::VirtualDir, &cfg);
        assert_eq!(attrs.mode, cfg.default_mode | 0o111);
    }

    #[test]
    fn content_type_guessed_from_extension() {
        let path = ObjectPath::parse("b", "docs/readme.html").unwrap();
        assert_eq!(guess_content_type(&path).as_deref(), Some("text/html"));
        let opaque = ObjectPath::parse("b", "no-extension").unwrap();
        assert_eq!(guess_content_type(&opaque), None);
    }
}
