//! Append-only data file writer.
//!
//! File layout:
//!
//! ```text
//! +----------------+---------------------+---------------------+---------+
//! | Header (64 B)  | Record frame        | Record frame        | padding |
//! +----------------+---------------------+---------------------+---------+
//!                  | len u32 | crc64 u64 | payload (len bytes) |
//! ```
//!
//! Records are framed with a big-endian payload length and a CRC-64 of the
//! payload. `finish()` backfills the item count into the header, pads the
//! file to a 4 KiB boundary and syncs; after that the file is immutable.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, WriteBytesExt};

use super::header::{Header, HEADER_SIZE};
use super::location::{DataLocation, MAX_OFFSET};
use crate::error::Result;
use crate::{hasher, Error};

/// Size the file is padded to a multiple of when finished.
pub const PAGE_SIZE: u64 = 4096;

/// Bytes of framing added to every record payload.
pub const FRAME_OVERHEAD: u64 = 4 + 8;

#[derive(Debug)]
pub struct DataFileWriter {
    file: File,
    writer: BufWriter<File>,
    header: Header,
    path: PathBuf,
    offset: u64,
    max_item_size: usize,
}

impl DataFileWriter {
    /// Creates a fresh data file at `path` and writes its header. Fails if
    /// the file already exists: file indexes are never reused.
    pub fn create(
        path: impl AsRef<Path>,
        file_index: u32,
        compaction_level: u32,
        buffer_size: usize,
        max_item_size: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::options()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut writer = BufWriter::with_capacity(buffer_size, file.try_clone()?);
        let header = Header::new(file_index, compaction_level);
        writer.write_all(&header.encode()?)?;

        Ok(Self {
            file,
            writer,
            header,
            path,
            offset: HEADER_SIZE as u64,
            max_item_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_index(&self) -> u32 {
        self.header.file_index
    }

    pub fn item_count(&self) -> u64 {
        self.header.item_count
    }

    /// Bytes the file will occupy before padding, including buffered data.
    pub fn size(&self) -> u64 {
        self.offset
    }

    /// Appends one record payload and returns its location. The size check
    /// runs before any bytes reach the buffer, so an oversized item leaves
    /// the file unchanged.
    pub fn append(&mut self, payload: &[u8]) -> Result<DataLocation> {
        if payload.len() > self.max_item_size {
            return Err(Error::ItemTooLarge {
                size: payload.len(),
                max: self.max_item_size,
            });
        }
        if self.offset + FRAME_OVERHEAD + payload.len() as u64 > MAX_OFFSET {
            return Err(Error::InvalidState(format!(
                "data file {} exceeds addressable offset range",
                self.header.file_index
            )));
        }

        let location = DataLocation::new(self.header.file_index, self.offset);

        self.writer.write_u32::<BigEndian>(payload.len() as u32)?;
        self.writer.write_u64::<BigEndian>(hasher::checksum(payload))?;
        self.writer.write_all(payload)?;

        self.offset += FRAME_OVERHEAD + payload.len() as u64;
        self.header.item_count += 1;

        Ok(location)
    }

    /// Seals the file: flushes buffered records, pads to the page boundary,
    /// backfills the item count into the header, and syncs. Consumes the
    /// writer; the file is immutable afterwards.
    pub fn finish(mut self) -> Result<Header> {
        self.writer.flush()?;

        let padded = self.offset.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        if padded > self.offset {
            let zeros = vec![0u8; (padded - self.offset) as usize];
            self.file.seek(SeekFrom::Start(self.offset))?;
            self.file.write_all(&zeros)?;
        }
        self.file.set_len(padded)?;

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header.encode()?)?;
        self.file.sync_all()?;

        Ok(self.header)
    }

    /// Abandons the file, removing it from disk. Used when a compaction or
    /// flush fails partway through.
    pub fn abort(self) -> Result<()> {
        drop(self.writer);
        drop(self.file);
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datafile::reader::DataFileReader;
    use crate::datafile::record::StoredLeaf;
    use crate::tmpfs::TempDir;

    fn create_writer(dir: &TempDir, file_index: u32) -> DataFileWriter {
        let path = dir.path().join(format!("{:08}.cdf", file_index));
        DataFileWriter::create(path, file_index, 0, 64 * 1024, 1024 * 1024)
            .expect("Failed to create writer")
    }

    #[test]
    fn test_append_returns_monotonic_locations() {
        let dir = TempDir::new().unwrap();
        let mut writer = create_writer(&dir, 3);

        let a = writer.append(b"first").unwrap();
        let b = writer.append(b"second").unwrap();

        assert_eq!(a.file_index(), 3);
        assert_eq!(a.offset(), HEADER_SIZE as u64);
        assert_eq!(b.offset(), a.offset() + FRAME_OVERHEAD + 5);
        assert_eq!(writer.item_count(), 2);
    }

    #[test]
    fn test_finish_pads_and_backfills_count() {
        let dir = TempDir::new().unwrap();
        let mut writer = create_writer(&dir, 0);
        let path = writer.path().to_path_buf();

        writer.append(b"payload").unwrap();
        writer.append(b"more").unwrap();
        let header = writer.finish().unwrap();

        assert_eq!(header.item_count, 2);
        let size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(size % PAGE_SIZE, 0);
        assert!(size >= HEADER_SIZE as u64);

        let reader = DataFileReader::open(&path).unwrap();
        assert_eq!(reader.header().item_count, 2);
    }

    #[test]
    fn test_oversized_item_fails_fast() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("00000000.cdf");
        let mut writer = DataFileWriter::create(path, 0, 0, 4096, 16).unwrap();

        let before = writer.size();
        let result = writer.append(&[0u8; 17]);
        assert!(matches!(result, Err(Error::ItemTooLarge { size: 17, max: 16 })));
        assert_eq!(writer.size(), before, "oversized append must not write");
        assert_eq!(writer.item_count(), 0);

        // The file still seals cleanly after the rejection.
        writer.append(&[1u8; 16]).unwrap();
        assert_eq!(writer.finish().unwrap().item_count, 1);
    }

    #[test]
    fn test_written_records_read_back() {
        let dir = TempDir::new().unwrap();
        let mut writer = create_writer(&dir, 1);
        let path = writer.path().to_path_buf();

        let leaf = StoredLeaf::new(9, b"apple".to_vec(), b"A".to_vec());
        let loc = writer.append(&leaf.encode().unwrap()).unwrap();
        writer.finish().unwrap();

        let reader = DataFileReader::open(&path).unwrap();
        let payload = reader.read_at(loc.offset()).unwrap();
        assert_eq!(StoredLeaf::decode(&payload).unwrap(), leaf);
    }

    #[test]
    fn test_abort_removes_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = create_writer(&dir, 5);
        let path = writer.path().to_path_buf();

        writer.append(b"doomed").unwrap();
        writer.abort().unwrap();
        assert!(!path.exists());
    }
}
