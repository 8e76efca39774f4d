//! Data file store: owns the directory of append-only data files.
//!
//! Files are written through a `DataFileWriter`, sealed with `publish`,
//! and served through `Arc<DataFileReader>` handles. A superseded file is
//! only unlinked once the last reader handle drops, so in-flight reads
//! never race a delete.

pub mod compaction;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::datafile::{DataFileReader, DataFileWriter, DataLocation};
use crate::error::Result;
use crate::Error;

const DATA_FILE_EXT: &str = "cdf";

pub struct FileStore {
    dir: PathBuf,
    write_buffer_size: usize,
    max_item_size: usize,
    next_file_index: AtomicU32,
    readers: RwLock<BTreeMap<u32, Arc<DataFileReader>>>,
}

impl FileStore {
    /// Opens the store's data directory, registering every sealed file.
    /// Files that were never sealed (zero item count, a crash artifact)
    /// are removed.
    pub fn open(config: &Config) -> Result<Self> {
        let dir = config.dir.join("data");
        fs::create_dir_all(&dir)?;

        let mut readers = BTreeMap::new();
        let mut max_index = 0u32;

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DATA_FILE_EXT) {
                continue;
            }
            let reader = DataFileReader::open(&path)?;
            if reader.header().item_count == 0 {
                tracing::warn!(path = %path.display(), "Removing unsealed data file");
                drop(reader);
                fs::remove_file(&path)?;
                continue;
            }
            let index = reader.file_index();
            max_index = max_index.max(index);
            readers.insert(index, Arc::new(reader));
        }

        Ok(Self {
            dir,
            write_buffer_size: config.write_buffer_size,
            max_item_size: config.max_item_size,
            next_file_index: AtomicU32::new(if readers.is_empty() { 0 } else { max_index + 1 }),
            readers: RwLock::new(readers),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, file_index: u32) -> PathBuf {
        self.dir.join(format!("{:08}.{}", file_index, DATA_FILE_EXT))
    }

    /// Allocates the next file index and creates a writer for it. The file
    /// is invisible to readers until `publish`.
    pub fn create_file(&self, compaction_level: u32) -> Result<DataFileWriter> {
        let index = self.next_file_index.fetch_add(1, Ordering::SeqCst);
        DataFileWriter::create(
            self.file_path(index),
            index,
            compaction_level,
            self.write_buffer_size,
            self.max_item_size,
        )
    }

    /// Seals a written file and makes it readable. Locations handed out by
    /// the writer are only dereferenceable after this returns.
    pub fn publish(&self, writer: DataFileWriter) -> Result<Arc<DataFileReader>> {
        let path = writer.path().to_path_buf();
        let header = writer.finish()?;
        let reader = Arc::new(DataFileReader::open(&path)?);

        let mut readers = self.readers.write().map_err(|_| Error::MutexPoisoned)?;
        readers.insert(header.file_index, Arc::clone(&reader));

        tracing::debug!(
            file_index = header.file_index,
            item_count = header.item_count,
            compaction_level = header.compaction_level,
            "Published data file"
        );
        Ok(reader)
    }

    pub fn read(&self, location: DataLocation) -> Result<Vec<u8>> {
        let reader = self
            .reader(location.file_index())
            .ok_or(Error::InvalidLocation(location.as_u64()))?;
        reader.read_at(location.offset())
    }

    pub fn reader(&self, file_index: u32) -> Option<Arc<DataFileReader>> {
        self.readers.read().ok()?.get(&file_index).cloned()
    }

    /// Snapshot of all registered readers, oldest file first.
    pub fn readers(&self) -> Vec<Arc<DataFileReader>> {
        match self.readers.read() {
            Ok(readers) => readers.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn file_count(&self) -> usize {
        self.readers.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Deregisters files and flags them for deletion. The unlink happens
    /// when the last outstanding reader handle drops.
    pub fn remove_files(&self, file_indexes: &[u32]) -> Result<()> {
        let mut readers = self.readers.write().map_err(|_| Error::MutexPoisoned)?;
        for index in file_indexes {
            if let Some(reader) = readers.remove(index) {
                reader.mark_for_deletion();
            }
        }
        Ok(())
    }
}
