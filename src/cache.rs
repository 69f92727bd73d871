//! Short-lived object metadata cache.
//!
//! Scoped to one filesystem instance; the remote store stays authoritative.
//! Entries carry both positive and negative lookups — existence checks are
//! issued repeatedly within milliseconds by callers walking a tree, and a
//! cached miss is as valuable as a cached hit. Entries expire after a short
//! TTL and are invalidated eagerly by every mutating operation. Per-key
//! entries live in a sharded map, so concurrent readers never contend on a
//! single lock.

use crate::list::Resolved;
use dashmap::DashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    resolved: Option<Resolved>,
    inserted: Instant,
}

/// TTL cache of resolved path lookups, keyed by `bucket/key`.
pub struct AttrCache {
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
}

impl AttrCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    fn cache_key(bucket: &str, key: &str) -> String {
        // Bucket names cannot contain the separator, so this is unambiguous.
        format!("{bucket}/{key}")
    }

    /// Look up a previously resolved entry. The outer `Option` is a cache
    /// miss; the inner one is a cached "does not exist".
    pub(crate) fn lookup(&self, bucket: &str, key: &str) -> Option<Option<Resolved>> {
        let id = Self::cache_key(bucket, key);
        if let Some(entry) = self.entries.get(&id) {
            if entry.inserted.elapsed() < self.ttl {
                tracing::trace!("cache hit for {id}");
                return Some(entry.resolved.clone());
            }
        }
        // Expired entries are dropped outside the shard guard.
        self.entries.remove_if(&id, |_, e| e.inserted.elapsed() >= self.ttl);
        None
    }

    pub(crate) fn insert(&self, bucket: &str, key: &str, resolved: Option<Resolved>) {
        self.entries.insert(
            Self::cache_key(bucket, key),
            CacheEntry {
                resolved,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop the entry for `key` along with its marker twin — a lookup may
    /// have been cached under either form.
    pub fn invalidate(&self, bucket: &str, key: &str) {
        let plain = key.trim_end_matches('/');
        self.entries.remove(&Self::cache_key(bucket, plain));
        self.entries
            .remove(&Self::cache_key(bucket, &format!("{plain}/")));
    }

    /// Drop every entry at or beneath `prefix`. Used after directory-level
    /// mutations, where any descendant may have changed.
    pub fn invalidate_prefix(&self, bucket: &str, prefix: &str) {
        let base = Self::cache_key(bucket, prefix.trim_end_matches('/'));
        self.entries
            .retain(|id, _| !(id == &base || id.starts_with(&format!("{base}/"))));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn negative_entries_are_cached() {
        let cache = AttrCache::new(Duration::from_secs(60));
        assert!(cache.lookup("b", "missing").is_none());
        cache.insert("b", "missing", None);
        assert_eq!(cache.lookup("b", "missing"), Some(None));
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = AttrCache::new(Duration::from_millis(10));
        cache.insert("b", "k", None);
        sleep(Duration::from_millis(20));
        assert!(cache.lookup("b", "k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn invalidate_drops_both_key_forms() {
        let cache = AttrCache::new(Duration::from_secs(60));
        cache.insert("b", "dir", None);
        cache.insert("b", "dir/", None);
        cache.invalidate("b", "dir");
        assert!(cache.lookup("b", "dir").is_none());
        assert!(cache.lookup("b", "dir/").is_none());
    }

    #[test]
    fn prefix_invalidation_spares_siblings() {
        let cache = AttrCache::new(Duration::from_secs(60));
        cache.insert("b", "dir/a", None);
        cache.insert("b", "dir/b/c", None);
        cache.insert("b", "dirt", None);
        cache.invalidate_prefix("b", "dir");
        assert!(cache.lookup("b", "dir/a").is_none());
        assert!(cache.lookup("b", "dir/b/c").is_none());
        assert_eq!(cache.lookup("b", "dirt"), Some(None));
    }
}
