//! Cached node hashes with dirty tracking.
//!
//! Hashes are stored in copy-on-write pages keyed by tree path, with the
//! all-zero digest as the "not computed" sentinel. Mutations only record
//! the touched leaf paths in the dirty set; actual digests are computed
//! when a root hash is requested, deepest path first, so each changed
//! node is hashed exactly once.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::tree::{Hash, NULL_HASH};

const PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct HashState {
    pages: Vec<Arc<Vec<Hash>>>,
    dirty: BTreeSet<u64>,
    /// Set when cached hashes are wholesale unusable (fresh reopen); the
    /// next recompute walks every leaf instead of the dirty set.
    full_recompute: bool,
}

impl HashState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn needs_full_recompute() -> Self {
        Self {
            pages: Vec::new(),
            dirty: BTreeSet::new(),
            full_recompute: true,
        }
    }

    pub fn get(&self, path: u64) -> Option<Hash> {
        let page = (path / PAGE_SIZE as u64) as usize;
        let slot = (path % PAGE_SIZE as u64) as usize;
        match self.pages.get(page) {
            Some(p) if p[slot] != NULL_HASH => Some(p[slot]),
            _ => None,
        }
    }

    pub fn set(&mut self, path: u64, hash: Hash) {
        let page = (path / PAGE_SIZE as u64) as usize;
        let slot = (path % PAGE_SIZE as u64) as usize;
        while self.pages.len() <= page {
            self.pages.push(Arc::new(vec![NULL_HASH; PAGE_SIZE]));
        }
        Arc::make_mut(&mut self.pages[page])[slot] = hash;
    }

    pub fn mark_dirty(&mut self, path: u64) {
        self.dirty.insert(path);
    }

    pub fn is_full_recompute(&self) -> bool {
        self.full_recompute
    }

    pub fn has_dirty(&self) -> bool {
        self.full_recompute || !self.dirty.is_empty()
    }

    /// Takes the pending worklist, leaving the state clean. Paths at or
    /// beyond `path_limit` are discarded; they fell out of the tree.
    pub fn take_worklist(&mut self, leaf_range: std::ops::RangeInclusive<u64>) -> BTreeSet<u64> {
        let path_limit = *leaf_range.end() + 1;
        let work: BTreeSet<u64> = if self.full_recompute {
            leaf_range.collect()
        } else {
            self.dirty.iter().copied().filter(|&p| p < path_limit).collect()
        };
        self.dirty.clear();
        self.full_recompute = false;
        work
    }

    /// Drops all cached hashes and pending work. Used when the tree
    /// becomes empty.
    pub fn reset(&mut self) {
        self.pages.clear();
        self.dirty.clear();
        self.full_recompute = false;
    }
}
