//! A single tree generation.
//!
//! A generation is one version of the tree: copy-on-write indexes
//! inherited from its parent, plus a mutation cache holding everything
//! changed since the parent was sealed. Reads consult the cache chain
//! (own cache, then unflushed ancestors) before falling back to the path
//! index and the data files.
//!
//! Exactly one generation is mutable at a time; sealing it and spawning a
//! child is O(1) because only page pointers are copied.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crossbeam_skiplist::SkipMap;

use super::hash::HashState;
use crate::datafile::StoredLeaf;
use crate::error::Result;
use crate::index::{KeyIndex, PathIndex};
use crate::store::FileStore;
use crate::tree::{
    self, first_leaf_path, internal_hash, last_leaf_path, leaf_hash, left_child, parent,
    right_child, Hash,
};
use crate::Error;

pub struct Generation {
    id: u64,
    store: Arc<FileStore>,
    leaf_count: AtomicU64,
    path_index: RwLock<PathIndex>,
    key_index: RwLock<KeyIndex>,
    /// Mutations since this generation was created. `None` is a tombstone:
    /// the path holds no leaf in this generation, whatever ancestors or the
    /// path index say.
    cache: SkipMap<u64, Option<StoredLeaf>>,
    /// Unflushed ancestor chain; pruned as ancestors flush.
    parent: RwLock<Option<Arc<Generation>>>,
    sealed: AtomicBool,
    flushed: AtomicBool,
    hashes: Mutex<HashState>,
}

impl Generation {
    /// A brand-new empty generation with nothing on disk behind it.
    pub fn genesis(id: u64, store: Arc<FileStore>) -> Self {
        Self {
            id,
            store,
            leaf_count: AtomicU64::new(0),
            path_index: RwLock::new(PathIndex::new()),
            key_index: RwLock::new(KeyIndex::new()),
            cache: SkipMap::new(),
            parent: RwLock::new(None),
            sealed: AtomicBool::new(false),
            flushed: AtomicBool::new(false),
            hashes: Mutex::new(HashState::new()),
        }
    }

    /// The mutable successor of a sealed generation. Indexes and cached
    /// hashes are shared copy-on-write; the cache starts empty.
    pub fn child_of(parent_gen: &Arc<Generation>, id: u64) -> Result<Self> {
        if !parent_gen.is_sealed() {
            return Err(Error::InvalidState(
                "cannot branch from an unsealed generation".to_string(),
            ));
        }
        let path_index = parent_gen.path_index()?;
        let key_index = parent_gen
            .key_index
            .read()
            .map_err(|_| Error::MutexPoisoned)?
            .clone();
        let hashes = parent_gen
            .hashes
            .lock()
            .map_err(|_| Error::MutexPoisoned)?
            .clone();
        Ok(Self {
            id,
            store: Arc::clone(&parent_gen.store),
            leaf_count: AtomicU64::new(parent_gen.leaf_count()),
            path_index: RwLock::new(path_index),
            key_index: RwLock::new(key_index),
            cache: SkipMap::new(),
            parent: RwLock::new(Some(Arc::clone(parent_gen))),
            sealed: AtomicBool::new(false),
            flushed: AtomicBool::new(false),
            hashes: Mutex::new(hashes),
        })
    }

    /// Rebuilds a fully-flushed generation from checkpoint state. Hashes
    /// are recomputed lazily on the first root hash request.
    pub fn from_checkpoint(
        id: u64,
        store: Arc<FileStore>,
        leaf_count: u64,
        path_index: PathIndex,
        key_index: KeyIndex,
    ) -> Self {
        Self {
            id,
            store,
            leaf_count: AtomicU64::new(leaf_count),
            path_index: RwLock::new(path_index),
            key_index: RwLock::new(key_index),
            cache: SkipMap::new(),
            parent: RwLock::new(None),
            sealed: AtomicBool::new(false),
            flushed: AtomicBool::new(false),
            hashes: Mutex::new(HashState::needs_full_recompute()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count.load(Ordering::Acquire)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed.load(Ordering::Acquire)
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    pub fn parent(&self) -> Option<Arc<Generation>> {
        self.parent.read().ok()?.clone()
    }

    /// Snapshot of the path index; O(pages) thanks to copy-on-write.
    pub fn path_index(&self) -> Result<PathIndex> {
        Ok(self
            .path_index
            .read()
            .map_err(|_| Error::MutexPoisoned)?
            .clone())
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::InvalidState(format!(
                "generation {} is sealed",
                self.id
            )));
        }
        Ok(())
    }

    fn mark_dirty(&self, path: u64) -> Result<()> {
        self.hashes
            .lock()
            .map_err(|_| Error::MutexPoisoned)?
            .mark_dirty(path);
        Ok(())
    }

    /// The leaf currently at `path`, or `None` if the slot is empty in
    /// this generation's view.
    pub fn leaf_at(&self, path: u64) -> Result<Option<StoredLeaf>> {
        // Cache chain first: the nearest entry wins, and a tombstone is
        // authoritative.
        if let Some(entry) = self.cache.get(&path) {
            return Ok(entry.value().clone());
        }
        let mut ancestor = self.parent();
        while let Some(gen) = ancestor {
            if let Some(entry) = gen.cache.get(&path) {
                return Ok(entry.value().clone());
            }
            ancestor = gen.parent();
        }

        // Fall through to flushed state.
        let location = {
            let index = self.path_index.read().map_err(|_| Error::MutexPoisoned)?;
            index.get(path)
        };
        match location {
            Some(loc) => {
                let payload = self.store.read(loc)?;
                let leaf = StoredLeaf::decode(&payload)?;
                Ok(Some(leaf))
            }
            None => Ok(None),
        }
    }

    pub fn path_of(&self, key: &[u8]) -> Result<Option<u64>> {
        Ok(self
            .key_index
            .read()
            .map_err(|_| Error::MutexPoisoned)?
            .get(key))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some(path) = self.path_of(key)? else {
            return Ok(None);
        };
        let leaf = self.leaf_at(path)?.ok_or_else(|| {
            Error::InvalidState(format!("key index points at empty path {}", path))
        })?;
        Ok(Some(leaf.value))
    }

    /// Stages a leaf at `path` and records the key mapping.
    fn place_leaf(&self, path: u64, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.key_index
            .write()
            .map_err(|_| Error::MutexPoisoned)?
            .insert(key.clone(), path);
        self.cache.insert(path, Some(StoredLeaf::new(path, key, value)));
        self.path_index
            .write()
            .map_err(|_| Error::MutexPoisoned)?
            .clear(path);
        self.mark_dirty(path)
    }

    /// Tombstones `path`: it holds no leaf in this generation.
    fn vacate(&self, path: u64) -> Result<()> {
        self.cache.insert(path, None);
        self.path_index
            .write()
            .map_err(|_| Error::MutexPoisoned)?
            .clear(path);
        Ok(())
    }

    /// Inserts or updates `key`. An update rewrites the leaf in place; an
    /// insert grows the tree by one leaf, relocating the first leaf down
    /// to keep every internal node fully populated.
    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.ensure_mutable()?;

        if let Some(path) = self.path_of(key)? {
            self.cache
                .insert(path, Some(StoredLeaf::new(path, key.to_vec(), value)));
            self.path_index
                .write()
                .map_err(|_| Error::MutexPoisoned)?
                .clear(path);
            return self.mark_dirty(path);
        }

        let n = self.leaf_count();
        if n == 0 {
            self.place_leaf(0, key.to_vec(), value)?;
            self.leaf_count.store(1, Ordering::Release);
            return Ok(());
        }

        // The first leaf's slot becomes an internal node; the leaf moves
        // down to the new left child and the new leaf takes the right.
        let old_first = first_leaf_path(n);
        let moved = self.leaf_at(old_first)?.ok_or_else(|| {
            Error::InvalidState(format!("missing leaf at path {}", old_first))
        })?;

        let new_left = left_child(old_first);
        let new_right = right_child(old_first);
        debug_assert_eq!(new_left, 2 * n - 1);
        debug_assert_eq!(new_right, 2 * n);

        self.place_leaf(new_left, moved.key, moved.value)?;
        self.place_leaf(new_right, key.to_vec(), value)?;
        self.vacate(old_first)?;
        self.mark_dirty(old_first)?;

        self.leaf_count.store(n + 1, Ordering::Release);
        Ok(())
    }

    /// Removes `key`, returning its value. The last leaf pair collapses
    /// into its parent slot so the leaf range stays contiguous.
    pub fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_mutable()?;

        let removed_path = {
            let mut index = self.key_index.write().map_err(|_| Error::MutexPoisoned)?;
            match index.remove(key) {
                Some(path) => path,
                None => return Ok(None),
            }
        };
        let removed = self.leaf_at(removed_path)?.ok_or_else(|| {
            Error::InvalidState(format!("key index points at empty path {}", removed_path))
        })?;

        let n = self.leaf_count();
        if n == 1 {
            self.vacate(0)?;
            self.leaf_count.store(0, Ordering::Release);
            self.hashes
                .lock()
                .map_err(|_| Error::MutexPoisoned)?
                .reset();
            return Ok(Some(removed.value));
        }

        let last = last_leaf_path(n);
        let last_sibling = last - 1;
        let collapse_to = parent(last);
        debug_assert_eq!(collapse_to, n - 2);

        let relocate = |from: u64, to: u64| -> Result<()> {
            let leaf = self.leaf_at(from)?.ok_or_else(|| {
                Error::InvalidState(format!("missing leaf at path {}", from))
            })?;
            self.place_leaf(to, leaf.key, leaf.value)
        };

        if removed_path == last {
            // The removed leaf was the last one; its sibling moves up.
            relocate(last_sibling, collapse_to)?;
        } else if removed_path == last_sibling {
            // The sibling is gone; the last leaf moves up alone.
            relocate(last, collapse_to)?;
        } else {
            relocate(last, removed_path)?;
            relocate(last_sibling, collapse_to)?;
        }

        self.vacate(last)?;
        self.vacate(last_sibling)?;
        self.mark_dirty(removed_path)?;
        self.mark_dirty(collapse_to)?;

        self.leaf_count.store(n - 1, Ordering::Release);
        Ok(Some(removed.value))
    }

    /// The Merkle root of this generation, recomputing stale nodes first.
    /// `None` for an empty tree.
    pub fn root_hash(&self) -> Result<Option<Hash>> {
        let n = self.leaf_count();
        let mut state = self.hashes.lock().map_err(|_| Error::MutexPoisoned)?;
        if n == 0 {
            state.reset();
            return Ok(None);
        }

        let range = first_leaf_path(n)..=last_leaf_path(n);
        if state.has_dirty() || state.get(0).is_none() {
            let mut work = state.take_worklist(range);
            if work.is_empty() && state.get(0).is_none() {
                // No hints at all (e.g. a cleared state): rebuild from
                // every leaf.
                work = (first_leaf_path(n)..=last_leaf_path(n)).collect();
            }

            // Deepest paths first: a node's children are always numbered
            // higher than the node, so popping the maximum guarantees
            // children are hashed before their parent.
            while let Some(path) = work.pop_last() {
                let hash = if tree::is_leaf(path, n) {
                    let leaf = self.leaf_at(path)?.ok_or_else(|| {
                        Error::InvalidState(format!("missing leaf at path {}", path))
                    })?;
                    leaf_hash(&leaf.key, &leaf.value)
                } else {
                    let left = state.get(left_child(path)).ok_or_else(|| {
                        Error::InvalidState(format!("missing child hash below {}", path))
                    })?;
                    let right = state.get(right_child(path)).ok_or_else(|| {
                        Error::InvalidState(format!("missing child hash below {}", path))
                    })?;
                    internal_hash(&left, &right)
                };
                state.set(path, hash);
                if path > 0 {
                    work.insert(parent(path));
                }
            }
        }

        Ok(state.get(0))
    }

    /// Cached hash of the node at `path`. Only meaningful after
    /// `root_hash()` has cleaned the dirty set.
    pub fn hash_at(&self, path: u64) -> Result<Option<Hash>> {
        Ok(self
            .hashes
            .lock()
            .map_err(|_| Error::MutexPoisoned)?
            .get(path))
    }

    // Flush support; see `map::flush`.

    pub(super) fn cache_snapshot(&self) -> Vec<(u64, Option<StoredLeaf>)> {
        self.cache
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub(super) fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub(super) fn publish_location(
        &self,
        path: u64,
        location: Option<crate::datafile::DataLocation>,
    ) -> Result<()> {
        let mut index = self.path_index.write().map_err(|_| Error::MutexPoisoned)?;
        match location {
            Some(loc) => index.set(path, loc),
            None => index.clear(path),
        }
        Ok(())
    }

    /// Conditionally repoints an index slot after compaction moved a
    /// record. No-op when this generation no longer references `from`.
    pub(super) fn repoint(
        &self,
        path: u64,
        from: crate::datafile::DataLocation,
        to: crate::datafile::DataLocation,
    ) -> Result<()> {
        let mut index = self.path_index.write().map_err(|_| Error::MutexPoisoned)?;
        if index.get(path) == Some(from) {
            index.set(path, to);
        }
        Ok(())
    }

    pub(super) fn clear_cache(&self) {
        self.cache.clear();
    }

    pub(super) fn set_flushed(&self) {
        self.flushed.store(true, Ordering::Release);
    }

    pub(super) fn detach_parent(&self, flushed: &Arc<Generation>) {
        if let Ok(mut parent) = self.parent.write() {
            if let Some(current) = parent.as_ref() {
                if Arc::ptr_eq(current, flushed) {
                    *parent = flushed.parent();
                }
            }
        }
    }

    // Reconnect support; see `reconnect::learner`.

    /// Reshapes the tree to `target` leaves without moving data. Slots
    /// whose role changes are marked stale so the next hash pass and the
    /// ensuing subtree streaming cover them; out-of-range leaves are
    /// dropped along with their key mappings.
    pub(crate) fn resize(&self, target: u64) -> Result<()> {
        self.ensure_mutable()?;
        let current = self.leaf_count();
        if target == current {
            return Ok(());
        }

        if target == 0 {
            // Tombstone every leaf slot: a plain cache clear would let
            // unflushed ancestor entries show through again.
            for path in first_leaf_path(current)..=last_leaf_path(current) {
                self.vacate(path)?;
            }
            let mut keys = self.key_index.write().map_err(|_| Error::MutexPoisoned)?;
            *keys = KeyIndex::new();
            drop(keys);
            self.hashes
                .lock()
                .map_err(|_| Error::MutexPoisoned)?
                .reset();
            self.leaf_count.store(0, Ordering::Release);
            return Ok(());
        }

        if target > current {
            // Paths that were leaves and become internal nodes: their
            // content is stale, and any key still living there must be
            // re-streamed to its new slot.
            if current > 0 {
                for path in first_leaf_path(current)..first_leaf_path(target) {
                    self.drop_leaf_slot(path)?;
                    self.mark_dirty(path)?;
                }
            }
        } else {
            // Paths that were internal and become leaves.
            for path in first_leaf_path(target)..first_leaf_path(current) {
                self.mark_dirty(path)?;
            }
            // Old leaves beyond the new range are dropped entirely.
            let new_last = last_leaf_path(target);
            for path in (new_last + 1)..=last_leaf_path(current) {
                self.drop_leaf_slot(path)?;
            }
        }

        self.leaf_count.store(target, Ordering::Release);
        Ok(())
    }

    /// Empties a leaf slot and retires its key mapping if it still points
    /// there.
    fn drop_leaf_slot(&self, path: u64) -> Result<()> {
        if let Some(leaf) = self.leaf_at(path)? {
            let mut keys = self.key_index.write().map_err(|_| Error::MutexPoisoned)?;
            if keys.get(&leaf.key) == Some(path) {
                keys.remove(&leaf.key);
            }
        }
        self.vacate(path)
    }

    /// Installs a streamed leaf at `path`, displacing whatever key owned
    /// the slot before.
    pub(crate) fn apply_leaf(&self, path: u64, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        self.ensure_mutable()?;
        if !tree::is_leaf(path, self.leaf_count()) {
            return Err(Error::InvalidArgument(format!(
                "path {} is not a leaf in a tree of {} leaves",
                path,
                self.leaf_count()
            )));
        }
        if let Some(previous) = self.leaf_at(path)? {
            if previous.key != key {
                let mut keys = self.key_index.write().map_err(|_| Error::MutexPoisoned)?;
                if keys.get(&previous.key) == Some(path) {
                    keys.remove(&previous.key);
                }
            }
        }
        self.place_leaf(path, key, value)
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("leaf_count", &self.leaf_count())
            .field("sealed", &self.is_sealed())
            .field("flushed", &self.is_flushed())
            .field("cached_mutations", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tmpfs::TempDir;

    fn fresh_generation(dir: &TempDir) -> Generation {
        let store = Arc::new(FileStore::open(&Config::new(dir.path())).unwrap());
        Generation::genesis(0, store)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let gen = fresh_generation(&dir);

        gen.put(b"apple", b"A".to_vec()).unwrap();
        gen.put(b"banana", b"B".to_vec()).unwrap();

        assert_eq!(gen.get(b"apple").unwrap(), Some(b"A".to_vec()));
        assert_eq!(gen.get(b"banana").unwrap(), Some(b"B".to_vec()));
        assert_eq!(gen.get(b"cherry").unwrap(), None);
        assert_eq!(gen.leaf_count(), 2);
    }

    #[test]
    fn test_put_existing_key_updates_in_place() {
        let dir = TempDir::new().unwrap();
        let gen = fresh_generation(&dir);

        gen.put(b"apple", b"A".to_vec()).unwrap();
        gen.put(b"banana", b"B".to_vec()).unwrap();
        let count_before = gen.leaf_count();

        gen.put(b"apple", b"A2".to_vec()).unwrap();
        assert_eq!(gen.get(b"apple").unwrap(), Some(b"A2".to_vec()));
        assert_eq!(gen.leaf_count(), count_before);
    }

    #[test]
    fn test_leaf_paths_stay_contiguous() {
        let dir = TempDir::new().unwrap();
        let gen = fresh_generation(&dir);

        let keys: Vec<String> = (0..10).map(|i| format!("key{}", i)).collect();
        for key in &keys {
            gen.put(key.as_bytes(), b"v".to_vec()).unwrap();
        }

        let n = gen.leaf_count();
        assert_eq!(n, 10);
        for path in first_leaf_path(n)..=last_leaf_path(n) {
            let leaf = gen.leaf_at(path).unwrap().expect("leaf slot must be full");
            assert_eq!(leaf.path, path);
            assert_eq!(gen.path_of(&leaf.key).unwrap(), Some(path));
        }
        // No leaves outside the range.
        assert!(gen.leaf_at(last_leaf_path(n) + 1).unwrap().is_none());
    }

    #[test]
    fn test_remove_returns_value_and_shrinks() {
        let dir = TempDir::new().unwrap();
        let gen = fresh_generation(&dir);

        for (key, value) in [(b"a", b"1"), (b"b", b"2"), (b"c", b"3")] {
            gen.put(key, value.to_vec()).unwrap();
        }

        assert_eq!(gen.remove(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(gen.remove(b"b").unwrap(), None);
        assert_eq!(gen.leaf_count(), 2);
        assert_eq!(gen.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(gen.get(b"c").unwrap(), Some(b"3".to_vec()));

        // Contiguity survives arbitrary removal order.
        let n = gen.leaf_count();
        for path in first_leaf_path(n)..=last_leaf_path(n) {
            assert!(gen.leaf_at(path).unwrap().is_some());
        }
    }

    #[test]
    fn test_remove_last_leaf_empties_tree() {
        let dir = TempDir::new().unwrap();
        let gen = fresh_generation(&dir);

        gen.put(b"only", b"1".to_vec()).unwrap();
        assert_eq!(gen.remove(b"only").unwrap(), Some(b"1".to_vec()));
        assert_eq!(gen.leaf_count(), 0);
        assert_eq!(gen.root_hash().unwrap(), None);

        // The tree is reusable after emptying.
        gen.put(b"again", b"2".to_vec()).unwrap();
        assert_eq!(gen.get(b"again").unwrap(), Some(b"2".to_vec()));
        assert!(gen.root_hash().unwrap().is_some());
    }

    #[test]
    fn test_root_hash_deterministic_and_content_sensitive() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let gen_a = fresh_generation(&dir_a);
        let gen_b = fresh_generation(&dir_b);

        for gen in [&gen_a, &gen_b] {
            gen.put(b"apple", b"A".to_vec()).unwrap();
            gen.put(b"banana", b"B".to_vec()).unwrap();
            gen.put(b"cherry", b"C".to_vec()).unwrap();
        }
        assert_eq!(gen_a.root_hash().unwrap(), gen_b.root_hash().unwrap());

        gen_b.put(b"cherry", b"C2".to_vec()).unwrap();
        assert_ne!(gen_a.root_hash().unwrap(), gen_b.root_hash().unwrap());
    }

    #[test]
    fn test_root_hash_depends_on_leaf_positions() {
        // Delete and reinsert: same key set, different insertion history,
        // so leaves land on different paths and the root differs.
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let gen_a = fresh_generation(&dir_a);
        let gen_b = fresh_generation(&dir_b);

        for key in [b"a" as &[u8], b"b", b"c", b"d"] {
            gen_a.put(key, b"v".to_vec()).unwrap();
            gen_b.put(key, b"v".to_vec()).unwrap();
        }
        assert_eq!(gen_a.root_hash().unwrap(), gen_b.root_hash().unwrap());

        gen_b.remove(b"a").unwrap();
        gen_b.put(b"a", b"v".to_vec()).unwrap();

        // Same key/value content, different arrangement.
        assert_eq!(gen_a.get(b"a").unwrap(), gen_b.get(b"a").unwrap());
        assert_ne!(gen_a.root_hash().unwrap(), gen_b.root_hash().unwrap());
    }

    #[test]
    fn test_sealed_generation_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let gen = fresh_generation(&dir);
        gen.put(b"a", b"1".to_vec()).unwrap();
        gen.seal();

        assert!(matches!(
            gen.put(b"b", b"2".to_vec()),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(gen.remove(b"a"), Err(Error::InvalidState(_))));
        // Reads still work.
        assert_eq!(gen.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_child_sees_parent_state_and_isolates_writes() {
        let dir = TempDir::new().unwrap();
        let gen = Arc::new(fresh_generation(&dir));

        gen.put(b"apple", b"A".to_vec()).unwrap();
        gen.put(b"banana", b"B".to_vec()).unwrap();
        gen.seal();
        let parent_root = gen.root_hash().unwrap();

        let child = Generation::child_of(&gen, 1).unwrap();
        assert_eq!(child.get(b"apple").unwrap(), Some(b"A".to_vec()));

        child.put(b"apple", b"A2".to_vec()).unwrap();
        child.put(b"cherry", b"C".to_vec()).unwrap();
        child.remove(b"banana").unwrap();

        // Parent view is untouched.
        assert_eq!(gen.get(b"apple").unwrap(), Some(b"A".to_vec()));
        assert_eq!(gen.get(b"banana").unwrap(), Some(b"B".to_vec()));
        assert_eq!(gen.get(b"cherry").unwrap(), None);
        assert_eq!(gen.leaf_count(), 2);
        assert_eq!(gen.root_hash().unwrap(), parent_root);

        // Child sees its own state.
        assert_eq!(child.get(b"apple").unwrap(), Some(b"A2".to_vec()));
        assert_eq!(child.get(b"banana").unwrap(), None);
        assert_eq!(child.get(b"cherry").unwrap(), Some(b"C".to_vec()));
        assert_ne!(child.root_hash().unwrap(), parent_root);
    }

    #[test]
    fn test_child_of_unsealed_parent_rejected() {
        let dir = TempDir::new().unwrap();
        let gen = Arc::new(fresh_generation(&dir));
        assert!(Generation::child_of(&gen, 1).is_err());
    }

    #[test]
    fn test_resize_shrink_drops_out_of_range_keys() {
        let dir = TempDir::new().unwrap();
        let gen = fresh_generation(&dir);

        for i in 0..5u8 {
            gen.put(&[b'k', i], vec![i]).unwrap();
        }
        assert_eq!(gen.leaf_count(), 5);

        gen.resize(3).unwrap();
        assert_eq!(gen.leaf_count(), 3);

        // Slots beyond the new range are gone.
        assert!(gen.leaf_at(last_leaf_path(3) + 1).unwrap().is_none());

        // Only the leaf whose path falls inside both the old and new
        // ranges survives; keys that fell out of range no longer resolve.
        let surviving: Vec<u8> = (0..5u8)
            .filter(|&i| gen.path_of(&[b'k', i]).unwrap().is_some())
            .collect();
        assert_eq!(surviving, vec![2]);
        assert_eq!(gen.path_of(b"k\x02").unwrap(), Some(4));
    }

    #[test]
    fn test_apply_leaf_displaces_previous_owner() {
        let dir = TempDir::new().unwrap();
        let gen = fresh_generation(&dir);

        gen.put(b"old", b"1".to_vec()).unwrap();
        assert_eq!(gen.leaf_count(), 1);

        gen.apply_leaf(0, b"new".to_vec(), b"2".to_vec()).unwrap();
        assert_eq!(gen.get(b"old").unwrap(), None);
        assert_eq!(gen.get(b"new").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_apply_leaf_rejects_internal_path() {
        let dir = TempDir::new().unwrap();
        let gen = fresh_generation(&dir);
        for i in 0..3u8 {
            gen.put(&[i], vec![i]).unwrap();
        }
        // Path 0 is internal in a 3-leaf tree.
        assert!(matches!(
            gen.apply_leaf(0, b"x".to_vec(), b"y".to_vec()),
            Err(Error::InvalidArgument(_))
        ));
    }
}
