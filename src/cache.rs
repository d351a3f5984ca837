//! LRU cache of decoded nodes, keyed by page id.
//!
//! Dirty nodes are tracked separately from the LRU ordering and are never
//! evicted: the WAL guarantees their durability, but evicting an in-memory
//! dirty node before it reaches the main file would force every read to
//! re-decode a page the writer is actively mutating, and would complicate
//! tracking which pages still need a checkpoint.

use crate::page::node::Node;
use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;

pub struct PageCache {
    lru: LruCache<u64, Node>,
    dirty: HashSet<u64>,
}

impl PageCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { lru: LruCache::new(cap), dirty: HashSet::new() }
    }

    #[must_use]
    pub fn get(&mut self, page_id: u64) -> Option<&Node> {
        self.lru.get(&page_id)
    }

    /// Inserts or replaces a clean (not-yet-mutated-in-memory) node.
    pub fn insert_clean(&mut self, page_id: u64, node: Node) {
        self.insert(page_id, node);
    }

    /// Inserts or replaces a node and marks it dirty, pinning it against
    /// eviction until [`Self::clear_dirty`] runs (typically after a
    /// checkpoint).
    pub fn insert_dirty(&mut self, page_id: u64, node: Node) {
        self.insert(page_id, node);
        self.dirty.insert(page_id);
    }

    fn insert(&mut self, page_id: u64, node: Node) {
        // Evict the least-recently-used clean entry to make room, skipping
        // dirty ones even if lru would otherwise choose them.
        if self.lru.len() >= self.lru.cap().get() && !self.lru.contains(&page_id) {
            self.evict_one_clean();
        }
        self.lru.put(page_id, node);
    }

    fn evict_one_clean(&mut self) {
        let victim = self
            .lru
            .iter()
            .rev()
            .map(|(id, _)| *id)
            .find(|id| !self.dirty.contains(id));
        if let Some(id) = victim {
            self.lru.pop(&id);
        }
        // If every resident entry is dirty, the cache is allowed to exceed
        // its nominal capacity until the next checkpoint clears some.
    }

    #[must_use]
    pub fn is_dirty(&self, page_id: u64) -> bool {
        self.dirty.contains(&page_id)
    }

    #[must_use]
    pub fn dirty_ids(&self) -> Vec<u64> {
        self.dirty.iter().copied().collect()
    }

    /// Marks a previously dirty page id clean again, making it eligible for
    /// eviction. Called once its image has been durably checkpointed.
    pub fn clear_dirty(&mut self, page_id: u64) {
        self.dirty.remove(&page_id);
    }

    pub fn clear_all_dirty(&mut self) {
        self.dirty.clear();
    }

    pub fn invalidate(&mut self, page_id: u64) {
        self.lru.pop(&page_id);
        self.dirty.remove(&page_id);
    }

    pub fn clear(&mut self) {
        self.lru.clear();
        self.dirty.clear();
    }
}
