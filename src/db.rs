//! The database handle: directory lifecycle, recovery, and the public
//! operations surface over the virtual map.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::datafile::StoredLeaf;
use crate::error::Result;
use crate::flock::FileLock;
use crate::index::{KeyIndex, PathIndex};
use crate::manifest::{self, Checkpoint};
use crate::map::generation::Generation;
use crate::map::{Snapshot, VirtualMap};
use crate::reconnect::{learner, teacher, BlockingQueue, Message, ReconnectReport};
use crate::scheduler::Scheduler;
use crate::store::FileStore;
use crate::tasks::{CompactionTask, FlushTask};
use crate::tree::Hash;
use crate::Error;

const LOCK_FILE: &str = "canopy.lock";

pub struct Database {
    config: Config,
    map: Arc<VirtualMap>,
    /// Held for the lifetime of the handle; released on drop.
    _lock: FileLock,
}

impl Database {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Database> {
        Self::open_with_config(Config::new(dir))
    }

    pub fn open_with_config(config: Config) -> Result<Database> {
        fs::create_dir_all(&config.dir)?;
        let lock =
            FileLock::acquire(config.dir.join(LOCK_FILE)).map_err(Error::LockError)?;
        let store = Arc::new(FileStore::open(&config)?);

        let map = match manifest::read(&config.dir)? {
            Some(checkpoint) => Arc::new(Self::recover(&config, store, checkpoint)?),
            None => Arc::new(VirtualMap::new(store, config.max_file_size)),
        };

        tracing::info!(dir = %config.dir.display(), "Opened database");
        Ok(Database {
            config,
            map,
            _lock: lock,
        })
    }

    /// Rebuilds the in-memory tree from the last checkpoint. Key
    /// mappings are not persisted; they are reconstructed by reading each
    /// checkpointed leaf once.
    fn recover(
        config: &Config,
        store: Arc<FileStore>,
        checkpoint: Checkpoint,
    ) -> Result<VirtualMap> {
        for &file_index in &checkpoint.files {
            if store.reader(file_index).is_none() {
                return Err(Error::CorruptedManifest(format!(
                    "checkpoint references missing data file {}",
                    file_index
                )));
            }
        }
        if checkpoint.leaves.len() as u64 != checkpoint.leaf_count {
            return Err(Error::CorruptedManifest(format!(
                "checkpoint lists {} leaves for a tree of {}",
                checkpoint.leaves.len(),
                checkpoint.leaf_count
            )));
        }

        let mut path_index = PathIndex::new();
        let mut key_index = KeyIndex::new();
        for &(path, location) in &checkpoint.leaves {
            let payload = store.read(location)?;
            let leaf = StoredLeaf::decode(&payload)?;
            path_index.set(path, location);
            key_index.insert(leaf.key, path);
        }

        let gen = Generation::from_checkpoint(
            0,
            Arc::clone(&store),
            checkpoint.leaf_count,
            path_index,
            key_index,
        );
        tracing::info!(
            leaf_count = checkpoint.leaf_count,
            files = checkpoint.files.len(),
            "Recovered from checkpoint"
        );
        Ok(VirtualMap::from_generation(
            store,
            config.max_file_size,
            gen,
        ))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.map.get(key)
    }

    pub fn put(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.map.put(key, value)
    }

    pub fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.map.remove(key)
    }

    pub fn root_hash(&self) -> Result<Option<Hash>> {
        self.map.root_hash()
    }

    pub fn leaf_count(&self) -> Result<u64> {
        self.map.leaf_count()
    }

    /// Seals the current generation into an immutable snapshot.
    pub fn fast_copy(&self) -> Result<Snapshot> {
        self.map.fast_copy()
    }

    /// Synchronously flushes every sealed generation.
    pub fn flush(&self) -> Result<u64> {
        self.map.flush_pending()
    }

    /// Synchronously runs one compaction pass.
    pub fn compact(&self) -> Result<bool> {
        self.map.compact(&self.config.compaction)
    }

    /// Makes the current tree durable: seals it, flushes it, and writes a
    /// manifest describing it. A reopen lands exactly here.
    pub fn checkpoint(&self) -> Result<()> {
        let snapshot = self.map.fast_copy()?;
        self.map.flush_pending()?;

        let index = snapshot.generation().path_index()?;
        let checkpoint = Checkpoint {
            leaf_count: snapshot.leaf_count(),
            files: self
                .map
                .store()
                .readers()
                .iter()
                .map(|r| r.file_index())
                .collect(),
            leaves: index.iter().collect(),
        };
        manifest::write(&self.config.dir, &checkpoint)?;
        snapshot.release();
        Ok(())
    }

    /// Registers periodic flush and compaction with `scheduler`.
    pub fn register_background_tasks(&self, scheduler: &Scheduler) -> Result<()> {
        scheduler.register(Arc::new(FlushTask::new(
            Arc::clone(&self.map),
            self.config.flush_interval,
        )))?;
        scheduler.register(Arc::new(CompactionTask::new(
            Arc::clone(&self.map),
            self.config.compaction.clone(),
            self.config.compaction_interval,
        )))
    }

    /// Serves one reconnect session from a sealed snapshot of this
    /// database's tree.
    pub fn serve_reconnect_as_teacher(
        &self,
        to_learner: &BlockingQueue<Message>,
        from_learner: &BlockingQueue<Message>,
    ) -> Result<()> {
        let snapshot = self.map.fast_copy()?;
        teacher::serve(&snapshot, to_learner, from_learner)
    }

    /// Rebuilds this database's tree from a teacher's stream. On failure
    /// the current state is preserved.
    pub fn start_reconnect_as_learner(
        &self,
        from_teacher: &BlockingQueue<Message>,
        to_teacher: &BlockingQueue<Message>,
    ) -> Result<ReconnectReport> {
        learner::learn(&self.map, from_teacher, to_teacher)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dir", &self.config.dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::config::ReconnectConfig;
    use crate::tmpfs::TempDir;

    #[test]
    fn test_checkpoint_reopen_roundtrip() {
        let dir = TempDir::new().unwrap();

        let keys: Vec<(&[u8], &[u8])> = vec![
            (b"A", b"apple"),
            (b"B", b"banana"),
            (b"C", b"cherry"),
            (b"D", b"date"),
            (b"E", b"elderberry"),
            (b"F", b"fig"),
            (b"G", b"grape"),
        ];

        let root_before;
        {
            let db = Database::open(dir.path()).unwrap();
            for (key, value) in &keys {
                db.put(key, value.to_vec()).unwrap();
            }
            root_before = db.root_hash().unwrap();
            db.checkpoint().unwrap();
        }

        let db = Database::open(dir.path()).unwrap();
        for (key, value) in &keys {
            assert_eq!(db.get(key).unwrap(), Some(value.to_vec()));
        }
        assert_eq!(db.root_hash().unwrap(), root_before);
        assert_eq!(db.leaf_count().unwrap(), 7);
    }

    #[test]
    fn test_delete_and_reinsert_changes_root() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();

        for (key, value) in [
            (b"A" as &[u8], b"apple" as &[u8]),
            (b"B", b"banana"),
            (b"C", b"cherry"),
            (b"D", b"date"),
            (b"E", b"elderberry"),
            (b"F", b"fig"),
            (b"G", b"grape"),
        ] {
            db.put(key, value.to_vec()).unwrap();
        }
        let original = db.root_hash().unwrap();

        assert_eq!(db.remove(b"D").unwrap(), Some(b"date".to_vec()));
        let after_delete = db.root_hash().unwrap();
        assert_ne!(after_delete, original);

        // Reinserting the same value does not restore the original root:
        // the leaf lands on a different path.
        db.put(b"D", b"date".to_vec()).unwrap();
        let reinserted_same = db.root_hash().unwrap();
        assert_ne!(reinserted_same, original);

        // A different value diverges further.
        db.put(b"D", b"dragonfruit".to_vec()).unwrap();
        assert_ne!(db.root_hash().unwrap(), reinserted_same);
    }

    #[test]
    fn test_mutations_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open(dir.path()).unwrap();
            db.put(b"a", b"1".to_vec()).unwrap();
            db.put(b"b", b"2".to_vec()).unwrap();
            db.checkpoint().unwrap();
        }

        let db = Database::open(dir.path()).unwrap();
        db.put(b"c", b"3".to_vec()).unwrap();
        assert_eq!(db.remove(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(db.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.get(b"c").unwrap(), Some(b"3".to_vec()));
        assert_eq!(db.leaf_count().unwrap(), 2);
        assert!(db.root_hash().unwrap().is_some());
    }

    #[test]
    fn test_second_open_rejected_while_locked() {
        let dir = TempDir::new().unwrap();
        let _db = Database::open(dir.path()).unwrap();
        assert!(matches!(
            Database::open(dir.path()),
            Err(Error::LockError(_))
        ));
    }

    #[test]
    fn test_reopen_after_close_succeeds() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open(dir.path()).unwrap();
            db.put(b"a", b"1".to_vec()).unwrap();
            db.checkpoint().unwrap();
        }
        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_fresh_directory_starts_empty() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.leaf_count().unwrap(), 0);
        assert_eq!(db.root_hash().unwrap(), None);
        assert_eq!(db.get(b"anything").unwrap(), None);
    }

    #[test]
    fn test_reconnect_between_databases() {
        let teacher_dir = TempDir::new().unwrap();
        let learner_dir = TempDir::new().unwrap();
        let teacher_db = Arc::new(Database::open(teacher_dir.path()).unwrap());
        let learner_db = Database::open(learner_dir.path()).unwrap();

        for i in 0..20u8 {
            teacher_db.put(&[b'k', i], vec![i]).unwrap();
        }
        learner_db.put(b"stale", b"x".to_vec()).unwrap();

        let config = ReconnectConfig::default()
            .queue_capacity(4)
            .queue_timeout(Duration::from_secs(5));
        let to_learner: BlockingQueue<Message> =
            BlockingQueue::new(config.queue_capacity, config.queue_timeout).unwrap();
        let to_teacher: BlockingQueue<Message> =
            BlockingQueue::new(config.queue_capacity, config.queue_timeout).unwrap();

        let teacher_handle = {
            let db = Arc::clone(&teacher_db);
            let out = to_learner.clone();
            let input = to_teacher.clone();
            thread::spawn(move || db.serve_reconnect_as_teacher(&out, &input))
        };
        let report = learner_db
            .start_reconnect_as_learner(&to_learner, &to_teacher)
            .unwrap();
        teacher_handle.join().unwrap().unwrap();

        assert_eq!(report.leaves_received, 20);
        assert_eq!(
            learner_db.root_hash().unwrap(),
            teacher_db.root_hash().unwrap()
        );
        assert_eq!(learner_db.get(b"stale").unwrap(), None);
        for i in 0..20u8 {
            assert_eq!(learner_db.get(&[b'k', i]).unwrap(), Some(vec![i]));
        }
    }

    #[tokio::test]
    async fn test_background_tasks_flush_automatically() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path())
            .flush_interval(Duration::from_millis(10))
            .compaction_interval(Duration::from_millis(20));
        let db = Database::open_with_config(config)?;

        db.put(b"a", b"1".to_vec())?;
        db.fast_copy()?.release();

        let scheduler = Scheduler::new();
        db.register_background_tasks(&scheduler)?;
        tokio::time::sleep(Duration::from_millis(80)).await;
        scheduler.shutdown().await?;

        // The sealed generation was flushed without an explicit call.
        assert!(!db.map.needs_flush()?);
        assert_eq!(db.get(b"a")?, Some(b"1".to_vec()));
        Ok(())
    }
}
