//! Immutable, append-only data files and their record format.

pub mod header;
pub mod location;
pub mod reader;
pub mod record;
pub mod writer;

pub use header::{Header, HEADER_SIZE};
pub use location::DataLocation;
pub use reader::DataFileReader;
pub use record::StoredLeaf;
pub use writer::DataFileWriter;
