//! The virtual map: a keyed Merkle tree with O(1) generational copies.
//!
//! One generation is mutable at a time. `fast_copy` seals it, hands the
//! sealed version out as a `Snapshot`, and installs a copy-on-write child
//! as the new mutable head. Sealed generations queue for flushing, oldest
//! first; snapshot readers keep flushed generations alive until released.
//!
//! Flush and compaction both run under the map's write lock, so index
//! publication is linearizable with respect to mutations and copies.
//! Snapshot reads never take that lock.

pub mod flush;
pub mod generation;
pub mod hash;

use std::sync::{Arc, RwLock, Weak};

use generation::Generation;

use crate::config::CompactionConfig;
use crate::error::Result;
use crate::index::PathIndex;
use crate::store::compaction::{self, LiveView};
use crate::store::FileStore;
use crate::tree::Hash;
use crate::Error;

/// A released, immutable view of one generation. Dropping it releases the
/// reservation; `release` just makes that explicit.
pub struct Snapshot {
    gen: Arc<Generation>,
}

impl Snapshot {
    pub fn id(&self) -> u64 {
        self.gen.id()
    }

    pub fn leaf_count(&self) -> u64 {
        self.gen.leaf_count()
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.gen.get(key)
    }

    pub fn root_hash(&self) -> Result<Option<Hash>> {
        self.gen.root_hash()
    }

    pub fn release(self) {}

    pub(crate) fn generation(&self) -> &Arc<Generation> {
        &self.gen
    }
}

struct MapInner {
    current: Arc<Generation>,
    /// Sealed generations awaiting flush, oldest first.
    pending_flush: Vec<Arc<Generation>>,
    /// Every sealed generation ever handed out; entries die when the last
    /// snapshot holder lets go.
    retired: Vec<Weak<Generation>>,
    /// Reconnect candidates under construction. They ride the same cache
    /// chain as everyone else, so flushes must publish into them too.
    candidates: Vec<Weak<Generation>>,
    next_id: u64,
}

pub struct VirtualMap {
    store: Arc<FileStore>,
    max_file_size: u64,
    inner: RwLock<MapInner>,
}

impl VirtualMap {
    pub fn new(store: Arc<FileStore>, max_file_size: u64) -> Self {
        let current = Arc::new(Generation::genesis(0, Arc::clone(&store)));
        Self {
            store,
            max_file_size,
            inner: RwLock::new(MapInner {
                current,
                pending_flush: Vec::new(),
                retired: Vec::new(),
                candidates: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Resumes from checkpoint state: a single fully-flushed generation.
    pub fn from_generation(store: Arc<FileStore>, max_file_size: u64, gen: Generation) -> Self {
        let next_id = gen.id() + 1;
        Self {
            store,
            max_file_size,
            inner: RwLock::new(MapInner {
                current: Arc::new(gen),
                pending_flush: Vec::new(),
                retired: Vec::new(),
                candidates: Vec::new(),
                next_id,
            }),
        }
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, MapInner>> {
        self.inner.read().map_err(|_| Error::MutexPoisoned)
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, MapInner>> {
        self.inner.write().map_err(|_| Error::MutexPoisoned)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let current = Arc::clone(&self.read_inner()?.current);
        current.get(key)
    }

    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        let current = Arc::clone(&self.write_inner()?.current);
        current.put(key, value)
    }

    pub fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let current = Arc::clone(&self.write_inner()?.current);
        current.remove(key)
    }

    pub fn root_hash(&self) -> Result<Option<Hash>> {
        let current = Arc::clone(&self.read_inner()?.current);
        current.root_hash()
    }

    pub fn leaf_count(&self) -> Result<u64> {
        Ok(self.read_inner()?.current.leaf_count())
    }

    pub fn current(&self) -> Result<Arc<Generation>> {
        Ok(Arc::clone(&self.read_inner()?.current))
    }

    /// Seals the mutable generation and returns it as a snapshot; a
    /// copy-on-write child becomes the new mutable head. O(1) in tree
    /// size.
    pub fn fast_copy(&self) -> Result<Snapshot> {
        let mut inner = self.write_inner()?;
        inner.current.seal();
        let sealed = Arc::clone(&inner.current);

        let child = Arc::new(Generation::child_of(&sealed, inner.next_id)?);
        inner.next_id += 1;
        inner.current = child;
        inner.pending_flush.push(Arc::clone(&sealed));
        inner.retired.push(Arc::downgrade(&sealed));
        inner.retired.retain(|w| w.strong_count() > 0);

        Ok(Snapshot { gen: sealed })
    }

    pub fn needs_flush(&self) -> Result<bool> {
        Ok(!self.read_inner()?.pending_flush.is_empty())
    }

    /// Flushes every pending sealed generation, oldest first. Holds the
    /// map write lock for the duration; snapshot reads are unaffected.
    pub fn flush_pending(&self) -> Result<u64> {
        let mut inner = self.write_inner()?;
        let pending = inner.pending_flush.clone();
        let mut flushed_records = 0;

        for gen in &pending {
            let mut newer: Vec<Arc<Generation>> = inner
                .pending_flush
                .iter()
                .filter(|g| g.id() > gen.id())
                .cloned()
                .collect();
            for weak in &inner.candidates {
                if let Some(candidate) = weak.upgrade() {
                    if candidate.id() > gen.id() {
                        newer.push(candidate);
                    }
                }
            }
            if inner.current.id() > gen.id() {
                newer.push(Arc::clone(&inner.current));
            }

            flushed_records += flush::flush_generation(gen, &self.store, &newer, self.max_file_size)?;
        }

        inner.pending_flush.retain(|g| !g.is_flushed());
        Ok(flushed_records)
    }

    /// Path indexes of every generation that can still serve reads: the
    /// mutable head, unflushed sealed generations, retired ones with live
    /// snapshot holders, and reconnect candidates under construction.
    fn live_indexes(inner: &MapInner) -> Result<Vec<PathIndex>> {
        let mut indexes = vec![inner.current.path_index()?];
        for gen in &inner.pending_flush {
            indexes.push(gen.path_index()?);
        }
        for weak in &inner.retired {
            if let Some(gen) = weak.upgrade() {
                if gen.is_flushed() {
                    indexes.push(gen.path_index()?);
                }
            }
        }
        for weak in &inner.candidates {
            if let Some(gen) = weak.upgrade() {
                indexes.push(gen.path_index()?);
            }
        }
        Ok(indexes)
    }

    fn live_generations(inner: &MapInner) -> Vec<Arc<Generation>> {
        let mut gens = vec![Arc::clone(&inner.current)];
        gens.extend(inner.pending_flush.iter().cloned());
        for weak in &inner.retired {
            if let Some(gen) = weak.upgrade() {
                if gen.is_flushed() {
                    gens.push(gen);
                }
            }
        }
        for weak in &inner.candidates {
            if let Some(gen) = weak.upgrade() {
                gens.push(gen);
            }
        }
        gens
    }

    pub fn needs_compaction(&self, config: &CompactionConfig) -> Result<bool> {
        let inner = self.read_inner()?;
        let live = LiveView::new(Self::live_indexes(&inner)?);
        Ok(compaction::needs_compaction(&self.store, &live, config))
    }

    /// Runs one compaction pass. Returns true if files were rewritten.
    pub fn compact(&self, config: &CompactionConfig) -> Result<bool> {
        let inner = self.write_inner()?;
        let live = LiveView::new(Self::live_indexes(&inner)?);

        let Some(outcome) = compaction::compact(&self.store, &live, config)? else {
            return Ok(false);
        };

        // Repoint every live generation that still references a moved
        // record, then retire the inputs.
        let generations = Self::live_generations(&inner);
        for relocation in &outcome.relocations {
            for gen in &generations {
                gen.repoint(relocation.path, relocation.from, relocation.to)?;
            }
        }
        self.store.remove_files(&outcome.input_files)?;
        Ok(true)
    }

    // Reconnect plumbing; see `reconnect`.

    /// Seals the mutable head and builds a candidate child for a learner
    /// session. The sealed head stays the readable authority until the
    /// candidate is installed or abandoned.
    pub(crate) fn begin_candidate(&self) -> Result<(Arc<Generation>, Arc<Generation>)> {
        let mut inner = self.write_inner()?;
        inner.current.seal();
        let base = Arc::clone(&inner.current);
        inner.pending_flush.push(Arc::clone(&base));
        inner.retired.push(Arc::downgrade(&base));

        let candidate = Arc::new(Generation::child_of(&base, inner.next_id)?);
        inner.next_id += 1;
        inner.candidates.push(Arc::downgrade(&candidate));
        inner.candidates.retain(|w| w.strong_count() > 0);
        Ok((base, candidate))
    }

    /// Atomically adopts a verified candidate as the mutable head.
    pub(crate) fn install_candidate(&self, candidate: Arc<Generation>) -> Result<()> {
        let mut inner = self.write_inner()?;
        inner.current = candidate;
        Ok(())
    }

    /// Restores a mutable head above the sealed base after an abort; the
    /// discarded candidate simply drops.
    pub(crate) fn restore_after_abort(&self, base: &Arc<Generation>) -> Result<()> {
        let mut inner = self.write_inner()?;
        let fresh = Arc::new(Generation::child_of(base, inner.next_id)?);
        inner.next_id += 1;
        inner.current = fresh;
        Ok(())
    }
}
