//! In-memory LRU blob cache bounded by byte count.
//!
//! The cache holds non-authoritative copies of blob bytes; the on-disk
//! store is always the source of truth. It performs no I/O and is meant to
//! sit behind a single mutex owned by the blob store.
//!
//! Sizing rules:
//! - an item larger than 10% of capacity is refused outright,
//! - inserts evict least-recently-accessed entries until the newcomer fits,
//! - zero capacity disables the cache entirely (all inserts refused).

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Cid;

/// Largest admissible item, as a fraction denominator of capacity (10%).
const MAX_ITEM_FRACTION: u64 = 10;

#[derive(Debug)]
struct Slot {
    data: Arc<Vec<u8>>,
    /// Monotonic access stamp; smallest = least recently used.
    stamp: u64,
}

/// Byte-bounded LRU cache keyed by CID.
#[derive(Debug)]
pub struct LruByteCache {
    max_bytes: u64,
    used_bytes: u64,
    clock: u64,
    entries: HashMap<Cid, Slot>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Snapshot of cache occupancy and hit rates.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub max_bytes: u64,
    pub used_bytes: u64,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl LruByteCache {
    /// Creates a cache with the given byte capacity.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            used_bytes: 0,
            clock: 0,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Looks up a blob and promotes it to most-recently-used.
    pub fn get(&mut self, cid: &Cid) -> Option<Arc<Vec<u8>>> {
        if self.max_bytes == 0 {
            self.misses += 1;
            return None;
        }
        self.clock += 1;
        let clock = self.clock;
        match self.entries.get_mut(cid) {
            Some(slot) => {
                slot.stamp = clock;
                self.hits += 1;
                Some(Arc::clone(&slot.data))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Inserts a blob, evicting older entries as needed.
    ///
    /// Returns `false` when the item was refused (too large, or capacity
    /// is zero).
    pub fn set(&mut self, cid: Cid, data: Arc<Vec<u8>>) -> bool {
        let size = data.len() as u64;
        if self.max_bytes == 0 || size * MAX_ITEM_FRACTION > self.max_bytes {
            return false;
        }

        // Replace-in-place counts as a fresh insert.
        if let Some(old) = self.entries.remove(&cid) {
            self.used_bytes -= old.data.len() as u64;
        }

        while self.used_bytes + size > self.max_bytes {
            let Some(victim) = self.least_recently_used() else {
                break;
            };
            self.evict(&victim);
        }

        self.clock += 1;
        self.used_bytes += size;
        self.entries.insert(
            cid,
            Slot {
                data,
                stamp: self.clock,
            },
        );
        true
    }

    /// Removes a blob, if cached.
    pub fn delete(&mut self, cid: &Cid) -> bool {
        match self.entries.remove(cid) {
            Some(slot) => {
                self.used_bytes -= slot.data.len() as u64;
                true
            }
            None => false,
        }
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.used_bytes = 0;
    }

    /// Occupancy and hit-rate snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            max_bytes: self.max_bytes,
            used_bytes: self.used_bytes,
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }

    fn least_recently_used(&self) -> Option<Cid> {
        self.entries
            .iter()
            .min_by_key(|(_, slot)| slot.stamp)
            .map(|(cid, _)| *cid)
    }

    fn evict(&mut self, cid: &Cid) {
        if let Some(slot) = self.entries.remove(cid) {
            self.used_bytes -= slot.data.len() as u64;
            self.evictions += 1;
        }
    }
}
