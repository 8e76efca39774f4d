use crate::error::Result;
use crate::Error;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub const HEADER_SIZE: usize = 64;

/// Fixed-size header at the start of every data file.
///
/// `item_count` is written as zero when the file is created and backfilled
/// when the writer finishes, so a non-zero count marks a sealed file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
    pub file_index: u32,
    pub created_at: u64,
    pub serializer_version: u32,
    pub compaction_level: u32,
    pub item_count: u64,
}

const MAGIC: &[u8; 8] = b"CANOPY\x00D";
const VERSION: u32 = 1;

pub const SERIALIZER_VERSION: u32 = 1;

impl Header {
    pub fn new(file_index: u32, compaction_level: u32) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Header {
            magic: *MAGIC,
            version: VERSION,
            file_index,
            created_at,
            serializer_version: SERIALIZER_VERSION,
            compaction_level,
            item_count: 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != *MAGIC {
            return Err(Error::InvalidMagic);
        }
        if self.version != VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        (&mut buf[8..12])
            .write_u32::<BigEndian>(self.version)
            .map_err(|e| Error::Encode("version", e))?;
        (&mut buf[12..16])
            .write_u32::<BigEndian>(self.file_index)
            .map_err(|e| Error::Encode("file_index", e))?;
        (&mut buf[16..24])
            .write_u64::<BigEndian>(self.created_at)
            .map_err(|e| Error::Encode("created_at", e))?;
        (&mut buf[24..28])
            .write_u32::<BigEndian>(self.serializer_version)
            .map_err(|e| Error::Encode("serializer_version", e))?;
        (&mut buf[28..32])
            .write_u32::<BigEndian>(self.compaction_level)
            .map_err(|e| Error::Encode("compaction_level", e))?;
        (&mut buf[32..40])
            .write_u64::<BigEndian>(self.item_count)
            .map_err(|e| Error::Encode("item_count", e))?;
        Ok(buf)
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);

        let version = (&buf[8..12]).read_u32::<BigEndian>()?;
        let file_index = (&buf[12..16]).read_u32::<BigEndian>()?;
        let created_at = (&buf[16..24]).read_u64::<BigEndian>()?;
        let serializer_version = (&buf[24..28]).read_u32::<BigEndian>()?;
        let compaction_level = (&buf[28..32]).read_u32::<BigEndian>()?;
        let item_count = (&buf[32..40]).read_u64::<BigEndian>()?;

        let header = Self {
            magic,
            version,
            file_index,
            created_at,
            serializer_version,
            compaction_level,
            item_count,
        };
        header.validate()?;
        Ok(header)
    }
}

impl TryFrom<&[u8]> for Header {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidHeader);
        }
        let fixed: &[u8; HEADER_SIZE] = bytes[..HEADER_SIZE]
            .try_into()
            .map_err(|_| Error::InvalidHeader)?;
        Header::decode(fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encoding_decoding() {
        let mut header = Header::new(7, 2);
        header.item_count = 42;

        let encoded = header.encode().unwrap();
        assert_eq!(encoded.len(), HEADER_SIZE);

        let decoded = Header::decode(&encoded).expect("Failed to decode header");
        assert_eq!(header, decoded);
        assert_eq!(decoded.file_index, 7);
        assert_eq!(decoded.compaction_level, 2);
        assert_eq!(decoded.item_count, 42);
    }

    #[test]
    fn test_header_magic_validation() {
        let mut buf = Header::new(0, 0).encode().unwrap();
        buf[0..8].copy_from_slice(b"INVALID!");

        let result = Header::decode(&buf);
        assert!(matches!(result, Err(Error::InvalidMagic)));
    }

    #[test]
    fn test_header_version_validation() {
        let mut buf = Header::new(0, 0).encode().unwrap();
        (&mut buf[8..12]).write_u32::<BigEndian>(999).unwrap();

        let result = Header::decode(&buf);
        assert!(matches!(result, Err(Error::UnsupportedVersion(999))));
    }

    #[test]
    fn test_header_decoding_invalid_length() {
        let invalid_data = [0u8; HEADER_SIZE - 2];
        let result = Header::try_from(&invalid_data[..]);
        assert!(matches!(result, Err(Error::InvalidHeader)));
    }
}
