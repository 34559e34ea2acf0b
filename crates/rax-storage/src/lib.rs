//! # Rax Storage
//!
//! Byte storage backends for RaxLog tables.
//!
//! Every persisted structure of a table lives in an offset-addressable byte
//! container implementing [`Storage`]. This crate provides the containers and
//! the factories that hand them out.
//!
//! ## Features
//!
//! - **Storage trait**: cursor-based read/write/flush over a named byte container
//! - **FileStorage**: one file inside a table's working directory
//! - **MemoryStorage**: growable in-memory buffer for tests and ephemeral tables
//! - **CompressedAppendStorage**: append-only stream that seals its tail into
//!   immutable LZ4 blocks and reads across blocks transparently
//! - **MetricsRegistry**: per-table metrics sink the compressed storage publishes to
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rax_storage::{
//!     MemoryStorageFactory, MetricsRegistry, Storage, StorageConfig, StorageFactory, StorageKind,
//! };
//!
//! let factory = MemoryStorageFactory::new(
//!     "example",
//!     StorageConfig::default(),
//!     Arc::new(MetricsRegistry::new()),
//! );
//! let mut data = factory.create_storage("_LOGS_DATA.BIN", StorageKind::AppendOnly);
//! data.create().unwrap();
//! data.write_at(0, b"hello").unwrap();
//!
//! let mut buf = [0u8; 5];
//! data.read_at(0, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//! ```

pub mod codec;
pub mod compressed;
pub mod config;
pub mod error;
pub mod factory;
pub mod file;
pub mod memory;
pub mod metrics;

// Re-exports
pub use codec::{FixedLayout, RecordIo};
pub use compressed::{CompressedAppendStorage, CompressedStorageHeader};
pub use config::{DEFAULT_BLOCK_SIZE_THRESHOLD, StorageConfig};
pub use error::StorageError;
pub use factory::{FileStorageFactory, MemoryStorageFactory, StorageFactory, StorageKind};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use metrics::MetricsRegistry;

use std::fmt;

/// An offset-addressable byte container.
///
/// Reads and writes happen at a cursor set with [`Storage::set_position`]
/// and advance it by the number of bytes transferred. A read either fills the
/// whole buffer or fails; short reads are never silent.
///
/// Storages are single-owner: every mutating operation takes `&mut self`, so
/// callers that share a storage wrap it in a lock.
pub trait Storage: Send + fmt::Debug {
    /// Name of the storage within its table
    fn name(&self) -> &str;

    /// Whether the backing resource already exists
    fn exists(&self) -> bool;

    /// Create (or truncate) the backing resource and open it
    fn create(&mut self) -> Result<(), StorageError>;

    /// Open an existing backing resource
    fn open(&mut self) -> Result<(), StorageError>;

    /// Close and remove the backing resource
    fn delete(&mut self) -> Result<(), StorageError>;

    /// Whether the storage is currently open
    fn is_open(&self) -> bool;

    /// Move the cursor
    fn set_position(&mut self, offset: u64) -> Result<(), StorageError>;

    /// Current cursor
    fn position(&self) -> u64;

    /// Fill `buf` from the cursor
    fn read(&mut self, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Write all of `buf` at the cursor
    fn write(&mut self, buf: &[u8]) -> Result<(), StorageError>;

    /// Fill `buf` starting at `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.set_position(offset)?;
        self.read(buf)
    }

    /// Write all of `buf` starting at `offset`
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        self.set_position(offset)?;
        self.write(buf)
    }

    /// Push buffered writes to the backing medium
    fn flush(&mut self) -> Result<(), StorageError>;

    /// Release the backing resource. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), StorageError>;
}
