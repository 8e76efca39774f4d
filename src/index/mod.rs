//! Copy-on-write indexes shared between generations.

pub mod key_index;
pub mod path_index;

pub use key_index::KeyIndex;
pub use path_index::PathIndex;
