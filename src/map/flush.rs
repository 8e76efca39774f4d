//! Flushing sealed generations to data files.
//!
//! A flush serializes a sealed generation's mutation cache into the file
//! store, seals the output file, and only then publishes the new locations
//! into the flushed generation's own path index and into every live newer
//! generation's index. Newer generations' own mutations shadow the
//! published slots through their caches, so the publication is always
//! safe. The cache is cleared last, which makes a failed flush retryable:
//! until publication completes, the cache remains the source of truth.
//!
//! Generations must flush oldest first so the cache chain never has a
//! flushed generation below an unflushed one.

use std::sync::Arc;

use super::generation::Generation;
use crate::error::Result;
use crate::store::FileStore;
use crate::Error;

/// Writes `gen`'s cached mutations to disk and publishes the results.
/// `newer` is every live generation younger than `gen`, including the
/// current mutable one. Returns the number of records written.
pub fn flush_generation(
    gen: &Arc<Generation>,
    store: &FileStore,
    newer: &[Arc<Generation>],
    max_file_size: u64,
) -> Result<u64> {
    if !gen.is_sealed() {
        return Err(Error::InvalidState(format!(
            "generation {} is not sealed",
            gen.id()
        )));
    }
    if gen.is_flushed() {
        return Ok(0);
    }
    if let Some(parent) = gen.parent() {
        if !parent.is_flushed() {
            return Err(Error::InvalidState(format!(
                "generation {} cannot flush before its parent {}",
                gen.id(),
                parent.id()
            )));
        }
    }

    let entries = gen.cache_snapshot();
    let mut written = Vec::new();
    let mut tombstones = Vec::new();

    if entries.iter().any(|(_, leaf)| leaf.is_some()) {
        let mut writer = store.create_file(0)?;
        for (path, leaf) in &entries {
            let Some(leaf) = leaf else {
                tombstones.push(*path);
                continue;
            };
            if writer.size() >= max_file_size {
                store.publish(writer)?;
                writer = store.create_file(0)?;
            }
            let location = writer.append(&leaf.encode()?)?;
            written.push((*path, location));
        }
        store.publish(writer)?;
    } else {
        tombstones.extend(entries.iter().map(|(path, _)| *path));
    }

    // Files are sealed; publish locations to this generation and every
    // newer live one.
    for &(path, location) in &written {
        gen.publish_location(path, Some(location))?;
        for g in newer {
            g.publish_location(path, Some(location))?;
        }
    }
    for &path in &tombstones {
        gen.publish_location(path, None)?;
        for g in newer {
            g.publish_location(path, None)?;
        }
    }

    gen.clear_cache();
    gen.set_flushed();

    // Descendants no longer need this generation's cache in their chain.
    for g in newer {
        g.detach_parent(gen);
    }

    tracing::info!(
        generation = gen.id(),
        records = written.len(),
        tombstones = tombstones.len(),
        "Flushed generation"
    );
    Ok(written.len() as u64)
}
