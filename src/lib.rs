//! Canopy: a virtualized Merkle key/value store.
//!
//! The tree is a complete binary tree of paths; leaves carry key/value
//! records and every node has a lazily computed hash. Mutations go to the
//! current generation's cache; `fast_copy` seals a generation in O(1) and
//! hands out an immutable snapshot while a copy-on-write child takes over
//! writes. Sealed generations flush to append-only data files, compaction
//! reclaims superseded records, and the reconnect engine resynchronizes a
//! stale replica from an authoritative peer by streaming only mismatched
//! subtrees.

pub mod config;
pub mod datafile;
pub mod db;
pub mod error;
pub mod flock;
pub mod hasher;
pub mod index;
pub mod manifest;
pub mod map;
pub mod reconnect;
pub mod scheduler;
pub mod store;
pub mod tasks;
pub mod tree;

#[cfg(test)]
pub mod tmpfs;

pub use config::{CompactionConfig, Config, ReconnectConfig};
pub use db::Database;
pub use error::{Error, Result};
pub use map::{Snapshot, VirtualMap};
pub use reconnect::{BlockingQueue, Message, ReconnectReport, SessionState};
