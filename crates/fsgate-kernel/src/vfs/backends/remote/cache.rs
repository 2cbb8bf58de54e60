//! Bounded stat cache for remote volumes.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::constants::{DEFAULT_STAT_CACHE_CAPACITY, DEFAULT_STAT_TTL};
use crate::vfs::types::{FileAttr, split};

#[derive(Debug, Clone)]
struct CachedStat {
    attr: FileAttr,
    expires_at: Instant,
}

/// Stat results keyed by normalized relative path.
///
/// Entries expire after `ttl`. A hit is a hint, never authoritative: any
/// miss or expiry goes back to the service. Mutations must call
/// [`StatCache::invalidate`] (or `invalidate_tree` for directories) so a
/// following stat or parent listing sees the change.
#[derive(Debug)]
pub struct StatCache {
    entries: DashMap<String, CachedStat>,
    ttl: Duration,
    capacity: usize,
}

impl Default for StatCache {
    fn default() -> Self {
        Self::new(DEFAULT_STAT_TTL, DEFAULT_STAT_CACHE_CAPACITY)
    }
}

impl StatCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, path: &str) -> Option<FileAttr> {
        let hit = self.entries.get(path)?;
        if hit.expires_at > Instant::now() {
            return Some(hit.attr.clone());
        }
        drop(hit);
        self.entries.remove(path);
        None
    }

    pub fn insert(&self, path: &str, attr: FileAttr) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(path) {
            self.evict();
        }
        self.entries.insert(
            path.to_string(),
            CachedStat {
                attr,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Drop expired entries, then the soonest-to-expire one if still full.
    fn evict(&self) {
        let now = Instant::now();
        self.entries.retain(|_, v| v.expires_at > now);
        if self.entries.len() < self.capacity {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.expires_at)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    /// Forget `path` and its parent directory.
    pub fn invalidate(&self, path: &str) {
        self.entries.remove(path);
        if let Some((parent, _)) = split(path) {
            self.entries.remove(parent);
        }
    }

    /// Forget `path`, everything below it and its parent directory.
    pub fn invalidate_tree(&self, path: &str) {
        self.invalidate(path);
        if path.is_empty() {
            self.entries.clear();
            return;
        }
        let prefix = format!("{path}/");
        self.entries.retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
