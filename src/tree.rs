//! Path arithmetic and node hashing for the virtual tree.
//!
//! Nodes are addressed by a `u64` path in a complete binary tree:
//! the root is path 0, and a node at path `p` has children `2p + 1`
//! and `2p + 2`. A tree holding `n > 0` leaves keeps them in the
//! contiguous path range `[n - 1, 2n - 2]`; paths `[0, n - 2]` are
//! internal, and every internal node has both children. Mutations
//! relocate at most two leaves to preserve that shape.

use sha2::{Digest, Sha256};

/// Sentinel for "no entry" in path-indexed tables.
pub const NULL_PATH: u64 = u64::MAX;

pub type Hash = [u8; 32];

/// All-zero digest used as the "not yet computed" sentinel in hash tables.
/// SHA-256 never produces it in practice.
pub const NULL_HASH: Hash = [0u8; 32];

const LEAF_TAG: u8 = 0x00;
const INTERNAL_TAG: u8 = 0x01;

pub fn parent(path: u64) -> u64 {
    debug_assert!(path > 0);
    (path - 1) / 2
}

pub fn left_child(path: u64) -> u64 {
    2 * path + 1
}

pub fn right_child(path: u64) -> u64 {
    2 * path + 2
}

pub fn sibling(path: u64) -> u64 {
    debug_assert!(path > 0);
    if path % 2 == 1 {
        path + 1
    } else {
        path - 1
    }
}

/// First leaf path for a tree of `leaf_count` leaves.
pub fn first_leaf_path(leaf_count: u64) -> u64 {
    debug_assert!(leaf_count > 0);
    leaf_count - 1
}

/// Last leaf path for a tree of `leaf_count` leaves.
pub fn last_leaf_path(leaf_count: u64) -> u64 {
    debug_assert!(leaf_count > 0);
    2 * leaf_count - 2
}

/// Whether `path` addresses a leaf in a tree of `leaf_count` leaves.
pub fn is_leaf(path: u64, leaf_count: u64) -> bool {
    leaf_count > 0 && path >= first_leaf_path(leaf_count) && path <= last_leaf_path(leaf_count)
}

/// Whether `path` addresses an internal node in a tree of `leaf_count` leaves.
pub fn is_internal(path: u64, leaf_count: u64) -> bool {
    leaf_count > 1 && path < first_leaf_path(leaf_count)
}

/// Digest of a leaf node. Domain-separated from internal nodes so a leaf
/// can never collide with an internal node over the same bytes.
pub fn leaf_hash(key: &[u8], value: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update((key.len() as u32).to_be_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize().into()
}

/// Digest of an internal node from its children's digests.
pub fn internal_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([INTERNAL_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}
