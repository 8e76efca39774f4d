use crate::error::Result;
use crate::Error;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// A leaf as stored on disk and staged in generation caches: the tree path
/// it occupies plus its key/value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLeaf {
    pub path: u64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl StoredLeaf {
    pub fn new(path: u64, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { path, key, value }
    }

    /// Serialized size of the record payload, before framing.
    pub fn encoded_len(&self) -> usize {
        8 + 4 + self.key.len() + 4 + self.value.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.write_u64::<BigEndian>(self.path)
            .map_err(|e| Error::Encode("leaf path", e))?;
        buf.write_u32::<BigEndian>(self.key.len() as u32)
            .map_err(|e| Error::Encode("key length", e))?;
        buf.extend_from_slice(&self.key);
        buf.write_u32::<BigEndian>(self.value.len() as u32)
            .map_err(|e| Error::Encode("value length", e))?;
        buf.extend_from_slice(&self.value);
        Ok(buf)
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let path = buf
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("leaf path", e))?;
        let key_len = buf
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("key length", e))? as usize;
        if buf.len() < key_len {
            return Err(Error::CorruptedFile(format!(
                "leaf record truncated: key needs {} bytes, {} remain",
                key_len,
                buf.len()
            )));
        }
        let key = buf[..key_len].to_vec();
        buf = &buf[key_len..];
        let value_len = buf
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("value length", e))? as usize;
        if buf.len() != value_len {
            return Err(Error::CorruptedFile(format!(
                "leaf record truncated: value needs {} bytes, {} remain",
                value_len,
                buf.len()
            )));
        }
        let value = buf[..value_len].to_vec();
        Ok(Self { path, key, value })
    }
}
