//! The bounded, mtime-invalidated cache of collection records (§4.D), plus
//! the query-pattern counters that drive opportunistic auto-indexing.

use std::collections::HashMap;
use std::time::{Instant, SystemTime};

use crate::record::Collection;

struct CacheEntry {
    records: Collection,
    mtime: SystemTime,
    last_access: Instant,
    access_count: u64,
}

/// Bounded map from collection name to its cached records.
///
/// Reads return a defensive copy so that a caller mutating its result never
/// poisons the cached state; writes always replace the entry outright.
pub struct Cache {
    entries: HashMap<String, CacheEntry>,
    max_entries: usize,
}

impl Cache {
    pub fn new(max_entries: usize) -> Self {
        Cache {
            entries: HashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Returns a fresh clone of the cached records for `collection` if the
    /// entry exists and is not older than `current_mtime`; `None` means the
    /// caller must refresh from storage.
    pub fn get(&mut self, collection: &str, current_mtime: SystemTime) -> Option<Collection> {
        let stale = match self.entries.get(collection) {
            Some(entry) => entry.mtime < current_mtime,
            None => return None,
        };
        if stale {
            log::debug!("cache entry for '{collection}' is stale, refresh required");
            return None;
        }

        let entry = self.entries.get_mut(collection).unwrap();
        entry.last_access = Instant::now();
        entry.access_count += 1;
        Some(entry.records.clone())
    }

    /// Replaces (or inserts) the cache entry for `collection`, evicting the
    /// least-recently-accessed entry first if the cache is at capacity.
    pub fn put(&mut self, collection: &str, records: Collection, mtime: SystemTime) {
        if !self.entries.contains_key(collection) && self.entries.len() >= self.max_entries {
            self.evict_lru();
        }
        self.entries.insert(
            collection.to_string(),
            CacheEntry {
                records,
                mtime,
                last_access: Instant::now(),
                access_count: 0,
            },
        );
    }

    /// Removes the cache entry for a dropped collection.
    pub fn invalidate(&mut self, collection: &str) {
        self.entries.remove(collection);
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.entries.contains_key(collection)
    }

    fn evict_lru(&mut self) {
        if let Some(victim) = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(name, _)| name.clone())
        {
            log::debug!("evicting cache entry for '{victim}' (cache at capacity)");
            self.entries.remove(&victim);
        }
    }
}

/// Per-(collection, field) counters of how often a filter referenced that
/// field, used to decide when to opportunistically build an index (§4.D).
#[derive(Default)]
pub struct QueryPatternCounters {
    counts: HashMap<(String, String), u64>,
}

impl QueryPatternCounters {
    pub const AUTO_INDEX_THRESHOLD: u64 = 5;

    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `field` was referenced in a filter against `collection`,
    /// returning the updated count.
    pub fn record(&mut self, collection: &str, field: &str) -> u64 {
        let key = (collection.to_string(), field.to_string());
        let count = self.counts.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    pub fn forget_collection(&mut self, collection: &str) {
        self.counts.retain(|(c, _), _| c != collection);
    }
}
