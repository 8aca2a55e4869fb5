//! Bounded in-process tier with insertion-order eviction
//!
//! Every insert gets a sequence number. The order queue holds
//! `(seq, key)` pairs and an eviction pops from the front, skipping pairs
//! whose sequence no longer matches the live entry (the key was overwritten
//! or removed since). Insert and evict are O(1) amortized.

use crate::cache::entry::CacheEntry;
use crate::cache::types::CacheKey;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

struct Slot {
    entry: CacheEntry,
    seq: u64,
}

/// In-process cache tier
pub struct MemoryTier {
    capacity: usize,
    slots: HashMap<CacheKey, Slot>,
    order: VecDeque<(u64, CacheKey)>,
    next_seq: u64,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Look up an entry without touching eviction order
    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.slots.get(key).map(|slot| &slot.entry)
    }

    /// Check if a key is present
    pub fn contains_key(&self, key: &CacheKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Insert an entry, returning the key evicted to make room
    ///
    /// Overwriting an existing key counts as a fresh insertion and never
    /// evicts anything.
    pub fn insert(&mut self, entry: CacheEntry) -> Option<CacheKey> {
        let key = entry.key;
        let mut evicted = None;

        if !self.slots.contains_key(&key) && self.slots.len() >= self.capacity {
            evicted = self.evict_oldest();
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(key, Slot { entry, seq });
        self.order.push_back((seq, key));
        self.compact_if_needed();

        evicted
    }

    /// Remove an entry
    pub fn remove(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let removed = self.slots.remove(key).map(|slot| slot.entry);
        self.compact_if_needed();
        removed
    }

    /// Keys whose entries are older than `ttl`
    pub fn expired_keys(&self, ttl: Duration) -> Vec<CacheKey> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(ttl))
            .map(|(key, _)| *key)
            .collect()
    }

    /// Keys from oldest to newest insertion
    pub fn keys_in_order(&self) -> Vec<CacheKey> {
        self.order
            .iter()
            .filter(|(seq, key)| self.is_live(*seq, key))
            .map(|(_, key)| *key)
            .collect()
    }

    /// Drop everything, returning the keys that were present
    pub fn clear(&mut self) -> Vec<CacheKey> {
        let keys = self.keys_in_order();
        self.slots.clear();
        self.order.clear();
        keys
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Approximate footprint of all entries
    pub fn size_bytes(&self) -> usize {
        self.slots.values().map(|slot| slot.entry.size_bytes()).sum()
    }

    fn evict_oldest(&mut self) -> Option<CacheKey> {
        while let Some((seq, key)) = self.order.pop_front() {
            if self.is_live(seq, &key) {
                self.slots.remove(&key);
                return Some(key);
            }
        }
        None
    }

    fn is_live(&self, seq: u64, key: &CacheKey) -> bool {
        self.slots.get(key).map(|slot| slot.seq) == Some(seq)
    }

    fn compact_if_needed(&mut self) {
        if self.order.len() > self.slots.len() * 2 + 16 {
            let slots = &self.slots;
            self.order
                .retain(|(seq, key)| slots.get(key).map(|slot| slot.seq) == Some(*seq));
        }
    }
}
