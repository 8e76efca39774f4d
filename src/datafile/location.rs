use std::fmt;

/// Packed address of a record inside the store: the upper 24 bits hold the
/// data file index, the lower 40 bits the byte offset of the record frame
/// within that file. The packing round-trips exactly and fits in one word
/// so index slots stay a plain `u64`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataLocation(u64);

const OFFSET_BITS: u32 = 40;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

pub const MAX_FILE_INDEX: u32 = (1 << 24) - 1;
pub const MAX_OFFSET: u64 = OFFSET_MASK;

impl DataLocation {
    pub fn new(file_index: u32, offset: u64) -> Self {
        debug_assert!(file_index <= MAX_FILE_INDEX);
        debug_assert!(offset <= MAX_OFFSET);
        Self(((file_index as u64) << OFFSET_BITS) | (offset & OFFSET_MASK))
    }

    pub fn file_index(self) -> u32 {
        (self.0 >> OFFSET_BITS) as u32
    }

    pub fn offset(self) -> u64 {
        self.0 & OFFSET_MASK
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataLocation({}:{})", self.file_index(), self.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_roundtrip() {
        let cases = [
            (0u32, 0u64),
            (1, 64),
            (42, 1 << 20),
            (MAX_FILE_INDEX, MAX_OFFSET),
            (MAX_FILE_INDEX, 0),
            (0, MAX_OFFSET),
        ];
        for (file_index, offset) in cases {
            let loc = DataLocation::new(file_index, offset);
            assert_eq!(loc.file_index(), file_index);
            assert_eq!(loc.offset(), offset);
            assert_eq!(DataLocation::from_u64(loc.as_u64()), loc);
        }
    }

    #[test]
    fn test_file_index_and_offset_do_not_alias() {
        // File index 1 at offset 0 must differ from file 0 at any offset.
        let a = DataLocation::new(1, 0);
        let b = DataLocation::new(0, MAX_OFFSET);
        assert_ne!(a.as_u64(), b.as_u64());
        assert!(a.as_u64() > b.as_u64());
    }
}
