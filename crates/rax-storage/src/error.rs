//! Error types for rax-storage
//!
//! Every failure in this crate is unrecoverable for the operation that hit
//! it. Nothing here retries; callers decide what to do with the error.

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error reported by the backing medium
    #[error("I/O error: {0}")]
    Io(String),

    /// The backing resource could not be opened or created
    #[error("Failed to acquire {resource}: {reason}")]
    Acquire { resource: String, reason: String },

    /// Operation on a storage that is not open (or was already closed)
    #[error("Storage is not open: {0}")]
    Closed(String),

    /// `open`/`create` called on a storage that is already open
    #[error("Storage is already open: {0}")]
    AlreadyOpen(String),

    /// A read asked for more bytes than the storage holds
    #[error("Unexpected end of {name}: wanted {wanted} bytes at offset {offset}, length is {length}")]
    UnexpectedEof {
        name: String,
        offset: u64,
        wanted: usize,
        length: u64,
    },

    /// A read ran past the known size of the uncompressed tail.
    ///
    /// This means the header and the data disagree, i.e. undetected
    /// corruption of the compressed stream.
    #[error("Uncompressed tail overrun: read needs {requested} bytes, tail holds {available}")]
    TailOverrun { requested: u64, available: u64 },

    /// A write would end past what the backing buffer can address
    #[error("Write of {len} bytes at offset {offset} is out of range for {name}")]
    OutOfRange {
        name: String,
        offset: u64,
        len: usize,
    },

    /// A write targeted bytes that already live in an immutable block
    #[error("Write at offset {offset} falls inside sealed blocks ending at {sealed_until}")]
    SealedRegion { offset: u64, sealed_until: u64 },

    /// A pending tail grew beyond what a single block header can describe
    #[error("Block of {0} bytes exceeds the maximum block size")]
    BlockTooLarge(usize),

    /// LZ4 encode/decode failure
    #[error("Compression error: {0}")]
    Compression(String),

    /// Persisted metadata is inconsistent
    #[error("Corrupted storage: {0}")]
    Corrupted(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<lz4_flex::block::DecompressError> for StorageError {
    fn from(err: lz4_flex::block::DecompressError) -> Self {
        StorageError::Compression(err.to_string())
    }
}

impl StorageError {
    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a new Closed error for the named storage
    pub fn closed(name: impl Into<String>) -> Self {
        Self::Closed(name.into())
    }

    /// Create a new Corrupted error
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Create a new Acquire error
    pub fn acquire(resource: impl Into<String>, reason: impl ToString) -> Self {
        Self::Acquire {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }
}
