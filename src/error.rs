use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    InvalidHeader,
    Decode(&'static str, io::Error),
    Encode(&'static str, io::Error),
    InvalidMagic,
    UnsupportedVersion(u32),
    ChecksumMismatch,
    CorruptedFile(String),
    CorruptedManifest(String),
    MutexPoisoned,
    ItemTooLarge { size: usize, max: usize },
    InvalidLocation(u64),
    InvalidState(String),
    InvalidArgument(String),
    EndOfStream,
    Timeout,
    ReconnectAborted(String),
    LockError(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::InvalidHeader => write!(f, "Invalid header"),
            Error::Decode(field, err) => write!(f, "Failed to decode {}: {}", field, err),
            Error::Encode(field, err) => write!(f, "Failed to encode {}: {}", field, err),
            Error::InvalidMagic => write!(f, "Invalid magic bytes"),
            Error::UnsupportedVersion(v) => write!(f, "Unsupported format version: {}", v),
            Error::ChecksumMismatch => write!(f, "Checksum mismatch"),
            Error::CorruptedFile(msg) => write!(f, "Corrupted data file: {}", msg),
            Error::CorruptedManifest(msg) => write!(f, "Corrupted manifest: {}", msg),
            Error::MutexPoisoned => write!(f, "Mutex was poisoned"),
            Error::ItemTooLarge { size, max } => {
                write!(f, "Item of {} bytes exceeds maximum of {} bytes", size, max)
            }
            Error::InvalidLocation(loc) => write!(f, "Invalid data location: {:#x}", loc),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::EndOfStream => write!(f, "End of stream"),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ReconnectAborted(msg) => write!(f, "Reconnect aborted: {}", msg),
            Error::LockError(err) => write!(f, "Lock error: {}", err),
        }
    }
}

impl std::error::Error for Error {}
