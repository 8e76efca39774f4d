use std::fmt;

use crc::{Algorithm, Crc};

pub const CRC_64_ECMA: Algorithm<u64> = crc::CRC_64_ECMA_182;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA);

/// Incremental CRC-64 over record payloads. One instance per writer,
/// reset between records.
#[derive(Clone, Default)]
pub struct Hasher {
    buffer: Vec<u8>,
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hasher")
    }
}

impl Hasher {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn write(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn checksum(&self) -> u64 {
        CRC64.checksum(&self.buffer)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// One-shot checksum of a complete payload.
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_checksum() {
        let mut hasher1 = Hasher::new();
        hasher1.write(b"hello ");
        hasher1.write(b"world");
        let checksum1 = hasher1.checksum();

        let mut hasher2 = Hasher::new();
        hasher2.write(b"hello world");
        let checksum2 = hasher2.checksum();

        assert_eq!(
            checksum1, checksum2,
            "Incremental and single-write checksums should match"
        );
    }

    #[test]
    fn test_one_shot_matches_incremental() {
        let mut hasher = Hasher::new();
        hasher.write(b"payload bytes");
        assert_eq!(hasher.checksum(), checksum(b"payload bytes"));
    }

    #[test]
    fn test_reset_hasher() {
        let mut hasher = Hasher::new();
        hasher.write(b"hello");
        let first_checksum = hasher.checksum();

        hasher.reset();
        hasher.write(b"hello");
        let second_checksum = hasher.checksum();

        assert_eq!(
            first_checksum, second_checksum,
            "Checksums after reset should match for same input"
        );
    }

    #[test]
    fn test_different_data_different_checksums() {
        assert_ne!(
            checksum(b"hello"),
            checksum(b"world"),
            "Different data should have different checksums"
        );
    }
}
