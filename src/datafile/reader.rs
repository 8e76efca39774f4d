use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use byteorder::{BigEndian, ReadBytesExt};

use super::header::{Header, HEADER_SIZE};
use super::writer::FRAME_OVERHEAD;
use crate::error::Result;
use crate::{hasher, Error};

/// Random-access reader over a sealed data file.
///
/// Readers are shared behind `Arc`; once a file has been superseded by
/// compaction it is marked for deletion, and the file disappears from disk
/// when the last reader drops.
#[derive(Debug)]
pub struct DataFileReader {
    file: Mutex<File>,
    header: Header,
    path: PathBuf,
    size: u64,
    delete_on_drop: AtomicBool,
}

impl DataFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let size = file.metadata()?.len();

        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::InvalidHeader
            } else {
                Error::IoError(e)
            }
        })?;
        let header = Header::decode(&buf)?;

        Ok(Self {
            file: Mutex::new(file),
            header,
            path,
            size,
            delete_on_drop: AtomicBool::new(false),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_index(&self) -> u32 {
        self.header.file_index
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads and verifies the record frame starting at `offset`.
    pub fn read_at(&self, offset: u64) -> Result<Vec<u8>> {
        if offset < HEADER_SIZE as u64 || offset + FRAME_OVERHEAD > self.size {
            return Err(Error::CorruptedFile(format!(
                "offset {} out of bounds for file {} of {} bytes",
                offset, self.header.file_index, self.size
            )));
        }

        let mut file = self.file.lock().map_err(|_| Error::MutexPoisoned)?;
        file.seek(SeekFrom::Start(offset))?;

        let len = file.read_u32::<BigEndian>()? as usize;
        let stored_crc = file.read_u64::<BigEndian>()?;

        if offset + FRAME_OVERHEAD + len as u64 > self.size {
            return Err(Error::CorruptedFile(format!(
                "record at offset {} in file {} overruns the file",
                offset, self.header.file_index
            )));
        }

        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)?;

        if hasher::checksum(&payload) != stored_crc {
            return Err(Error::ChecksumMismatch);
        }
        Ok(payload)
    }

    /// Sequential scan over every record in the file, in write order.
    /// Yields `(offset, payload)` pairs; used by compaction and reopen.
    pub fn iter(&self) -> Result<RecordIterator> {
        // The scan gets its own descriptor; a cloned handle would share
        // its seek cursor with concurrent `read_at` calls.
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        Ok(RecordIterator {
            reader,
            offset: HEADER_SIZE as u64,
            remaining: self.header.item_count,
        })
    }

    /// Flags the file for removal once the last `Arc` reference drops.
    pub fn mark_for_deletion(&self) {
        self.delete_on_drop.store(true, Ordering::Release);
    }
}

impl Drop for DataFileReader {
    fn drop(&mut self) {
        if self.delete_on_drop.load(Ordering::Acquire) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    file_index = self.header.file_index,
                    error = %e,
                    "Failed to delete superseded data file"
                );
            }
        }
    }
}

pub struct RecordIterator {
    reader: BufReader<File>,
    offset: u64,
    remaining: u64,
}

impl RecordIterator {
    fn read_next(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let frame_offset = self.offset;
        let len = match self.reader.read_u32::<BigEndian>() {
            Ok(len) => len as usize,
            // EOF at a frame boundary with records still expected is
            // corruption, not a clean end.
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::CorruptedFile(format!(
                    "file ended with {} records unread",
                    self.remaining
                )));
            }
            Err(e) => return Err(Error::IoError(e)),
        };
        let stored_crc = self.reader.read_u64::<BigEndian>()?;

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::CorruptedFile("unexpected EOF inside record payload".to_string())
            } else {
                Error::IoError(e)
            }
        })?;

        if hasher::checksum(&payload) != stored_crc {
            return Err(Error::ChecksumMismatch);
        }

        self.offset += FRAME_OVERHEAD + len as u64;
        self.remaining -= 1;
        Ok(Some((frame_offset, payload)))
    }
}

impl Iterator for RecordIterator {
    type Item = Result<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}
