//! Reconnect wire messages.
//!
//! Frame layout: a one-byte tag followed by big-endian fields. Variable
//! length fields carry a u32 length prefix. The in-process engine passes
//! `Message` values directly; the codec is the contract for a transport
//! that frames them.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::tree::Hash;
use crate::Error;

const TAG_TREE_INFO: u8 = 1;
const TAG_NODE_HASH: u8 = 2;
const TAG_HASH_MATCH: u8 = 3;
const TAG_HASH_MISMATCH: u8 = 4;
const TAG_REQUEST_SUBTREE: u8 = 5;
const TAG_LEAF_RECORD: u8 = 6;
const TAG_END_OF_SUBTREE: u8 = 7;
const TAG_DONE: u8 = 8;
const TAG_ABORT: u8 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Teacher's opening message: the shape and root of its tree.
    TreeInfo {
        leaf_count: u64,
        root_hash: Option<Hash>,
    },
    /// Teacher offers the hash of one node.
    NodeHash { path: u64, hash: Hash },
    /// Learner's hash for the node matches; the subtree is pruned.
    HashMatch { path: u64 },
    /// Learner's hash differs; the teacher descends into the children.
    HashMismatch { path: u64 },
    /// Learner wants every leaf record beneath the node.
    RequestSubtree { path: u64 },
    /// One leaf streamed for a requested subtree.
    LeafRecord {
        path: u64,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// All leaves of the requested subtree have been sent.
    EndOfSubtree { path: u64 },
    /// Teacher's traversal is complete.
    Done,
    /// Either side is giving up on the session.
    Abort { reason: String },
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Message::TreeInfo {
                leaf_count,
                root_hash,
            } => {
                buf.push(TAG_TREE_INFO);
                Self::put_u64(&mut buf, *leaf_count)?;
                match root_hash {
                    Some(hash) => {
                        buf.push(1);
                        buf.extend_from_slice(hash);
                    }
                    None => buf.push(0),
                }
            }
            Message::NodeHash { path, hash } => {
                buf.push(TAG_NODE_HASH);
                Self::put_u64(&mut buf, *path)?;
                buf.extend_from_slice(hash);
            }
            Message::HashMatch { path } => {
                buf.push(TAG_HASH_MATCH);
                Self::put_u64(&mut buf, *path)?;
            }
            Message::HashMismatch { path } => {
                buf.push(TAG_HASH_MISMATCH);
                Self::put_u64(&mut buf, *path)?;
            }
            Message::RequestSubtree { path } => {
                buf.push(TAG_REQUEST_SUBTREE);
                Self::put_u64(&mut buf, *path)?;
            }
            Message::LeafRecord { path, key, value } => {
                buf.push(TAG_LEAF_RECORD);
                Self::put_u64(&mut buf, *path)?;
                Self::put_bytes(&mut buf, key)?;
                Self::put_bytes(&mut buf, value)?;
            }
            Message::EndOfSubtree { path } => {
                buf.push(TAG_END_OF_SUBTREE);
                Self::put_u64(&mut buf, *path)?;
            }
            Message::Done => buf.push(TAG_DONE),
            Message::Abort { reason } => {
                buf.push(TAG_ABORT);
                Self::put_bytes(&mut buf, reason.as_bytes())?;
            }
        }
        Ok(buf)
    }

    fn put_u64(buf: &mut Vec<u8>, value: u64) -> Result<()> {
        buf.write_u64::<BigEndian>(value)
            .map_err(|e| Error::Encode("message field", e))
    }

    fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
        buf.write_u32::<BigEndian>(bytes.len() as u32)
            .map_err(|e| Error::Encode("message length", e))?;
        buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn decode(data: &[u8]) -> Result<Message> {
        let mut cursor = data;
        let tag = cursor
            .read_u8()
            .map_err(|e| Error::Decode("message tag", e))?;
        let message = match tag {
            TAG_TREE_INFO => {
                let leaf_count = Self::read_u64(&mut cursor)?;
                let present = cursor
                    .read_u8()
                    .map_err(|e| Error::Decode("message root flag", e))?;
                let root_hash = match present {
                    0 => None,
                    1 => Some(Self::read_hash(&mut cursor)?),
                    other => {
                        return Err(Error::InvalidArgument(format!(
                            "invalid root hash flag {}",
                            other
                        )))
                    }
                };
                Message::TreeInfo {
                    leaf_count,
                    root_hash,
                }
            }
            TAG_NODE_HASH => Message::NodeHash {
                path: Self::read_u64(&mut cursor)?,
                hash: Self::read_hash(&mut cursor)?,
            },
            TAG_HASH_MATCH => Message::HashMatch {
                path: Self::read_u64(&mut cursor)?,
            },
            TAG_HASH_MISMATCH => Message::HashMismatch {
                path: Self::read_u64(&mut cursor)?,
            },
            TAG_REQUEST_SUBTREE => Message::RequestSubtree {
                path: Self::read_u64(&mut cursor)?,
            },
            TAG_LEAF_RECORD => {
                let path = Self::read_u64(&mut cursor)?;
                let key = Self::read_bytes(&mut cursor)?;
                let value = Self::read_bytes(&mut cursor)?;
                Message::LeafRecord { path, key, value }
            }
            TAG_END_OF_SUBTREE => Message::EndOfSubtree {
                path: Self::read_u64(&mut cursor)?,
            },
            TAG_DONE => Message::Done,
            TAG_ABORT => {
                let bytes = Self::read_bytes(&mut cursor)?;
                let reason = String::from_utf8(bytes).map_err(|_| {
                    Error::InvalidArgument("abort reason is not utf-8".to_string())
                })?;
                Message::Abort { reason }
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown message tag {}",
                    other
                )))
            }
        };
        if !cursor.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "{} trailing bytes after message",
                cursor.len()
            )));
        }
        Ok(message)
    }

    fn read_u64(cursor: &mut &[u8]) -> Result<u64> {
        cursor
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("message field", e))
    }

    fn read_hash(cursor: &mut &[u8]) -> Result<Hash> {
        let mut hash = [0u8; 32];
        cursor
            .read_exact(&mut hash)
            .map_err(|e| Error::Decode("message hash", e))?;
        Ok(hash)
    }

    fn read_bytes(cursor: &mut &[u8]) -> Result<Vec<u8>> {
        let len = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("message length", e))? as usize;
        if cursor.len() < len {
            return Err(Error::InvalidArgument(
                "message shorter than declared length".to_string(),
            ));
        }
        let (bytes, rest) = cursor.split_at(len);
        let bytes = bytes.to_vec();
        *cursor = rest;
        Ok(bytes)
    }
}
