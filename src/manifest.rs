//! Checkpoint manifest: the durable description of one flushed tree.
//!
//! File layout:
//!
//! ```text
//! +----------------+-----------------+--------------------------------+
//! | Header (64 B)  | file table      | leaf table                     |
//! +----------------+-----------------+--------------------------------+
//!                  | file_index u32… | (path u64, location u64)…      |
//! ```
//!
//! The header carries a CRC-64 of the whole body. The manifest is written
//! to a temporary file and renamed into place, so readers only ever see a
//! complete checkpoint. Node hashes are deliberately absent; a reopened
//! store recomputes them lazily from the leaves.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::datafile::DataLocation;
use crate::error::Result;
use crate::{hasher, Error};

const MANIFEST_FILE: &str = "manifest";
const MANIFEST_TMP: &str = "manifest.tmp";

const MAGIC: &[u8; 8] = b"CANOPY\x00M";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 64;

/// Everything needed to reopen a store to an identical tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub leaf_count: u64,
    pub files: Vec<u32>,
    pub leaves: Vec<(u64, DataLocation)>,
}

impl Checkpoint {
    fn encode_body(&self) -> Result<Vec<u8>> {
        let mut body =
            Vec::with_capacity(self.files.len() * 4 + self.leaves.len() * 16);
        for &file_index in &self.files {
            body.write_u32::<BigEndian>(file_index)
                .map_err(|e| Error::Encode("file_index", e))?;
        }
        for &(path, location) in &self.leaves {
            body.write_u64::<BigEndian>(path)
                .map_err(|e| Error::Encode("leaf path", e))?;
            body.write_u64::<BigEndian>(location.as_u64())
                .map_err(|e| Error::Encode("leaf location", e))?;
        }
        Ok(body)
    }
}

/// Atomically replaces the checkpoint on disk.
pub fn write(dir: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let body = checkpoint.encode_body()?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..8].copy_from_slice(MAGIC);
    (&mut header[8..12])
        .write_u32::<BigEndian>(VERSION)
        .map_err(|e| Error::Encode("version", e))?;
    (&mut header[12..20])
        .write_u64::<BigEndian>(checkpoint.leaf_count)
        .map_err(|e| Error::Encode("leaf_count", e))?;
    (&mut header[20..24])
        .write_u32::<BigEndian>(checkpoint.files.len() as u32)
        .map_err(|e| Error::Encode("file_count", e))?;
    (&mut header[24..32])
        .write_u64::<BigEndian>(checkpoint.leaves.len() as u64)
        .map_err(|e| Error::Encode("entry_count", e))?;
    (&mut header[32..40])
        .write_u64::<BigEndian>(hasher::checksum(&body))
        .map_err(|e| Error::Encode("body checksum", e))?;

    let tmp_path = dir.join(MANIFEST_TMP);
    {
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header)?;
        writer.write_all(&body)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, dir.join(MANIFEST_FILE))?;

    tracing::debug!(
        leaf_count = checkpoint.leaf_count,
        files = checkpoint.files.len(),
        "Wrote checkpoint manifest"
    );
    Ok(())
}

/// Reads the checkpoint, or `None` when the store has never been
/// checkpointed.
pub fn read(dir: &Path) -> Result<Option<Checkpoint>> {
    let path = dir.join(MANIFEST_FILE);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::IoError(e)),
    };
    let mut reader = BufReader::new(file);

    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::CorruptedManifest("truncated header".to_string())
        } else {
            Error::IoError(e)
        }
    })?;

    if &header[0..8] != MAGIC {
        return Err(Error::InvalidMagic);
    }
    let version = (&header[8..12]).read_u32::<BigEndian>()?;
    if version != VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let leaf_count = (&header[12..20]).read_u64::<BigEndian>()?;
    let file_count = (&header[20..24]).read_u32::<BigEndian>()? as usize;
    let entry_count = (&header[24..32]).read_u64::<BigEndian>()? as usize;
    let stored_crc = (&header[32..40]).read_u64::<BigEndian>()?;

    let mut body = vec![0u8; file_count * 4 + entry_count * 16];
    reader.read_exact(&mut body).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::CorruptedManifest("truncated body".to_string())
        } else {
            Error::IoError(e)
        }
    })?;
    if hasher::checksum(&body) != stored_crc {
        return Err(Error::ChecksumMismatch);
    }

    let mut cursor = &body[..];
    let mut files = Vec::with_capacity(file_count);
    for _ in 0..file_count {
        files.push(cursor.read_u32::<BigEndian>()?);
    }
    let mut leaves = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        let path = cursor.read_u64::<BigEndian>()?;
        let location = DataLocation::from_u64(cursor.read_u64::<BigEndian>()?);
        leaves.push((path, location));
    }

    Ok(Some(Checkpoint {
        leaf_count,
        files,
        leaves,
    }))
}
