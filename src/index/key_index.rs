//! Key -> leaf path index with copy-on-write shards.
//!
//! Same sharing discipline as the path index: cloning copies shard
//! pointers, and a write through a clone materializes only the touched
//! shard. Shard count is fixed so clone cost stays constant.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

const SHARD_COUNT: usize = 256;

#[derive(Debug, Clone)]
pub struct KeyIndex {
    shards: Vec<Arc<HashMap<Vec<u8>, u64>>>,
}

impl Default for KeyIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyIndex {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Arc::new(HashMap::new()))
                .collect(),
        }
    }

    fn shard_of(key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % SHARD_COUNT as u64) as usize
    }

    pub fn get(&self, key: &[u8]) -> Option<u64> {
        self.shards[Self::shard_of(key)].get(key).copied()
    }

    pub fn insert(&mut self, key: Vec<u8>, path: u64) {
        let shard = Self::shard_of(&key);
        Arc::make_mut(&mut self.shards[shard]).insert(key, path);
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<u64> {
        let shard = Self::shard_of(key);
        if !self.shards[shard].contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.shards[shard]).remove(key)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }
}
