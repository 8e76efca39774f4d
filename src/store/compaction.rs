//! Live-ratio compaction for data files.
//!
//! A record is live when some live generation's path index still points at
//! its exact location; everything else in a file is garbage left behind by
//! overwrites, removals, and earlier compactions. Files whose live fraction
//! drops below the configured threshold are rewritten: live records are
//! copied into a fresh file one compaction level up, the caller republishes
//! the relocated locations into every live generation's index, and the
//! input files are dropped via deferred deletion.
//!
//! The merge is all-or-nothing. Any failure before the output file is
//! sealed aborts it and leaves the inputs authoritative.

use std::sync::Arc;

use super::FileStore;
use crate::config::CompactionConfig;
use crate::datafile::{DataFileReader, DataLocation, StoredLeaf};
use crate::error::Result;
use crate::index::PathIndex;

/// Immutable snapshot of every live generation's path index, taken under
/// the owner's maintenance lock. Cloning a `PathIndex` is a pointer copy,
/// so the snapshot is cheap and stable for the whole merge.
pub struct LiveView {
    indexes: Vec<PathIndex>,
}

impl LiveView {
    pub fn new(indexes: Vec<PathIndex>) -> Self {
        Self { indexes }
    }

    /// Whether any live generation still points `path` at `location`.
    pub fn is_live(&self, path: u64, location: DataLocation) -> bool {
        self.indexes
            .iter()
            .any(|index| index.get(path) == Some(location))
    }
}

/// A record moved by compaction: every live generation whose index maps
/// `path` to `from` must be repointed to `to`.
#[derive(Debug, Clone, Copy)]
pub struct Relocation {
    pub path: u64,
    pub from: DataLocation,
    pub to: DataLocation,
}

pub struct CompactionOutcome {
    pub relocations: Vec<Relocation>,
    pub input_files: Vec<u32>,
    pub output_file: Option<u32>,
    pub records_copied: u64,
    pub records_dropped: u64,
}

/// Fraction of a file's records that are still referenced.
fn live_ratio(reader: &DataFileReader, live: &LiveView) -> Result<f64> {
    let total = reader.header().item_count;
    if total == 0 {
        return Ok(0.0);
    }
    let mut live_count = 0u64;
    for record in reader.iter()? {
        let (offset, payload) = record?;
        let leaf = StoredLeaf::decode(&payload)?;
        let location = DataLocation::new(reader.file_index(), offset);
        if live.is_live(leaf.path, location) {
            live_count += 1;
        }
    }
    Ok(live_count as f64 / total as f64)
}

/// Selects the sealed files worth compacting, oldest first.
pub fn find_candidates(
    store: &FileStore,
    live: &LiveView,
    config: &CompactionConfig,
) -> Result<Vec<Arc<DataFileReader>>> {
    let mut candidates = Vec::new();
    for reader in store.readers() {
        if reader.size() < config.min_file_size {
            continue;
        }
        let ratio = live_ratio(&reader, live)?;
        if ratio <= config.max_live_ratio {
            tracing::debug!(
                file_index = reader.file_index(),
                live_ratio = ratio,
                "Compaction candidate"
            );
            candidates.push(reader);
        }
    }
    Ok(candidates)
}

pub fn needs_compaction(store: &FileStore, live: &LiveView, config: &CompactionConfig) -> bool {
    match find_candidates(store, live, config) {
        Ok(candidates) => candidates.len() >= config.min_files,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to evaluate compaction candidates");
            false
        }
    }
}

/// Rewrites the live records of the candidate files into one new file.
/// Returns `None` when there is nothing to do. The caller is responsible
/// for applying the relocations to live generation indexes and then
/// removing the input files; both must happen under the same maintenance
/// lock that guarded the `LiveView` snapshot.
pub fn compact(
    store: &FileStore,
    live: &LiveView,
    config: &CompactionConfig,
) -> Result<Option<CompactionOutcome>> {
    let candidates = find_candidates(store, live, config)?;
    if candidates.len() < config.min_files {
        return Ok(None);
    }

    let target_level = candidates
        .iter()
        .map(|r| r.header().compaction_level)
        .max()
        .unwrap_or(0)
        + 1;
    let input_files: Vec<u32> = candidates.iter().map(|r| r.file_index()).collect();

    tracing::info!(
        input_files = candidates.len(),
        target_level = target_level,
        "Starting compaction"
    );

    let mut writer = store.create_file(target_level)?;
    let mut relocations = Vec::new();
    let mut records_dropped = 0u64;

    let mut copy_records = || -> Result<()> {
        for reader in &candidates {
            for record in reader.iter()? {
                let (offset, payload) = record?;
                let leaf = StoredLeaf::decode(&payload)?;
                let from = DataLocation::new(reader.file_index(), offset);
                if !live.is_live(leaf.path, from) {
                    records_dropped += 1;
                    continue;
                }
                let to = writer.append(&payload)?;
                relocations.push(Relocation {
                    path: leaf.path,
                    from,
                    to,
                });
            }
        }
        Ok(())
    };

    if let Err(e) = copy_records() {
        tracing::error!(error = %e, "Compaction merge failed, aborting output file");
        writer.abort()?;
        return Err(e);
    }

    let records_copied = relocations.len() as u64;
    let output_file = if records_copied > 0 {
        let reader = store.publish(writer)?;
        Some(reader.file_index())
    } else {
        // Every input record was garbage; no output file needed.
        writer.abort()?;
        None
    };

    tracing::info!(
        records_copied = records_copied,
        records_dropped = records_dropped,
        output_file = ?output_file,
        "Compaction complete"
    );

    Ok(Some(CompactionOutcome {
        relocations,
        input_files,
        output_file,
        records_copied,
        records_dropped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tmpfs::TempDir;

    fn open_store(dir: &TempDir) -> FileStore {
        FileStore::open(&Config::new(dir.path())).expect("Failed to open store")
    }

    fn write_leaves(store: &FileStore, leaves: &[StoredLeaf]) -> Vec<DataLocation> {
        let mut writer = store.create_file(0).unwrap();
        let locations = leaves
            .iter()
            .map(|leaf| writer.append(&leaf.encode().unwrap()).unwrap())
            .collect();
        store.publish(writer).unwrap();
        locations
    }

    fn test_config() -> CompactionConfig {
        CompactionConfig::default().min_files(1).min_file_size(0)
    }

    #[test]
    fn test_fully_live_file_not_selected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let leaves = vec![
            StoredLeaf::new(1, b"a".to_vec(), b"1".to_vec()),
            StoredLeaf::new(2, b"b".to_vec(), b"2".to_vec()),
        ];
        let locations = write_leaves(&store, &leaves);

        let mut index = PathIndex::new();
        index.set(1, locations[0]);
        index.set(2, locations[1]);
        let live = LiveView::new(vec![index]);

        let candidates = find_candidates(&store, &live, &test_config()).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_compact_drops_dead_and_relocates_live() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let leaves = vec![
            StoredLeaf::new(1, b"a".to_vec(), b"1".to_vec()),
            StoredLeaf::new(2, b"b".to_vec(), b"2".to_vec()),
            StoredLeaf::new(3, b"c".to_vec(), b"3".to_vec()),
            StoredLeaf::new(4, b"d".to_vec(), b"4".to_vec()),
        ];
        let locations = write_leaves(&store, &leaves);

        // Only paths 1 and 3 are still referenced.
        let mut index = PathIndex::new();
        index.set(1, locations[0]);
        index.set(3, locations[2]);
        let live = LiveView::new(vec![index.clone()]);

        let outcome = compact(&store, &live, &test_config())
            .unwrap()
            .expect("compaction should run");

        assert_eq!(outcome.records_copied, 2);
        assert_eq!(outcome.records_dropped, 2);
        assert_eq!(outcome.input_files, vec![0]);
        let output = outcome.output_file.expect("live records need an output");

        // Relocated records carry the same payloads at their new locations.
        for relocation in &outcome.relocations {
            let payload = store.read(relocation.to).unwrap();
            let leaf = StoredLeaf::decode(&payload).unwrap();
            assert_eq!(leaf.path, relocation.path);
            assert_eq!(index.get(relocation.path), Some(relocation.from));
        }

        // Output file sits one level above the inputs.
        let reader = store.reader(output).unwrap();
        assert_eq!(reader.header().compaction_level, 1);
    }

    #[test]
    fn test_compact_all_dead_produces_no_output() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        write_leaves(&store, &[StoredLeaf::new(1, b"a".to_vec(), b"1".to_vec())]);
        let live = LiveView::new(vec![PathIndex::new()]);

        let outcome = compact(&store, &live, &test_config())
            .unwrap()
            .expect("compaction should run");
        assert_eq!(outcome.output_file, None);
        assert_eq!(outcome.records_dropped, 1);
    }

    #[test]
    fn test_record_live_in_any_generation_survives() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let leaves = vec![
            StoredLeaf::new(1, b"a".to_vec(), b"1".to_vec()),
            StoredLeaf::new(2, b"b".to_vec(), b"2".to_vec()),
        ];
        let locations = write_leaves(&store, &leaves);

        // An older generation still references path 2 even though the
        // newest one does not.
        let mut old_index = PathIndex::new();
        old_index.set(2, locations[1]);
        let new_index = PathIndex::new();
        let live = LiveView::new(vec![old_index, new_index]);

        let outcome = compact(&store, &live, &test_config())
            .unwrap()
            .expect("compaction should run");
        assert_eq!(outcome.records_copied, 1);
        assert_eq!(outcome.relocations[0].path, 2);
    }

    #[test]
    fn test_min_files_threshold_blocks_compaction() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        write_leaves(&store, &[StoredLeaf::new(1, b"a".to_vec(), b"1".to_vec())]);
        let live = LiveView::new(vec![PathIndex::new()]);

        let config = CompactionConfig::default().min_files(2).min_file_size(0);
        assert!(!needs_compaction(&store, &live, &config));
        assert!(compact(&store, &live, &config).unwrap().is_none());
    }
}
