//! Storage factories
//!
//! A table never constructs storages directly. It asks its factory for a
//! storage by name, which keeps the table independent of where its bytes live.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::Storage;
use crate::compressed::CompressedAppendStorage;
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::file::FileStorage;
use crate::memory::MemoryStorage;
use crate::metrics::MetricsRegistry;

/// Suffix of the compressed-block satellite storage
pub const COMPRESSED_BLOCKS_SUFFIX: &str = ".LZ4";
/// Suffix of the block index and header satellite storage
pub const COMPRESSED_HEADER_SUFFIX: &str = ".LZ4-HEAD";

/// Kind of storage requested from a factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    /// Plain randomly writable storage
    #[default]
    Plain,
    /// Append-only stream with transparent block compression
    AppendOnly,
}

/// Creates the storages of one table
pub trait StorageFactory: Send + Sync + fmt::Debug {
    /// Create a storage handle. Nothing is opened or created yet.
    fn create_storage(&self, name: &str, kind: StorageKind) -> Box<dyn Storage>;

    /// Metrics sink shared by every storage of this factory
    fn metrics(&self) -> &Arc<MetricsRegistry>;

    /// Human readable location, used in logs
    fn location(&self) -> String;
}

/// Factory for storages living as files in one working directory
#[derive(Debug)]
pub struct FileStorageFactory {
    working_dir: PathBuf,
    config: StorageConfig,
    metrics: Arc<MetricsRegistry>,
}

impl FileStorageFactory {
    /// Create a factory rooted at `working_dir`, creating the directory if needed
    pub fn new(
        working_dir: impl AsRef<Path>,
        config: StorageConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, StorageError> {
        let working_dir = working_dir.as_ref().to_path_buf();
        if !working_dir.is_dir() {
            std::fs::create_dir_all(&working_dir)
                .map_err(|e| StorageError::acquire(working_dir.display().to_string(), e))?;
            info!(path = %working_dir.display(), "Created table directory");
        }
        Ok(Self {
            working_dir,
            config,
            metrics,
        })
    }

    /// The table's working directory
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

impl StorageFactory for FileStorageFactory {
    fn create_storage(&self, name: &str, kind: StorageKind) -> Box<dyn Storage> {
        let sync = self.config.sync_on_flush;
        match kind {
            StorageKind::Plain => Box::new(FileStorage::new(&self.working_dir, name, sync)),
            StorageKind::AppendOnly => {
                let tail = FileStorage::new(&self.working_dir, name, sync);
                let blocks = FileStorage::new(
                    &self.working_dir,
                    &format!("{name}{COMPRESSED_BLOCKS_SUFFIX}"),
                    sync,
                );
                let header = FileStorage::new(
                    &self.working_dir,
                    &format!("{name}{COMPRESSED_HEADER_SUFFIX}"),
                    sync,
                );
                Box::new(CompressedAppendStorage::new(
                    Box::new(tail),
                    Box::new(blocks),
                    Box::new(header),
                    &self.config,
                    Arc::clone(&self.metrics),
                ))
            }
        }
    }

    fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    fn location(&self) -> String {
        self.working_dir.display().to_string()
    }
}

/// Factory for in-memory storages.
///
/// Every call returns a fresh, empty storage; nothing outlives the table.
#[derive(Debug)]
pub struct MemoryStorageFactory {
    table_name: String,
    config: StorageConfig,
    metrics: Arc<MetricsRegistry>,
}

impl MemoryStorageFactory {
    /// Create a factory for the in-memory table `table_name`
    pub fn new(
        table_name: impl Into<String>,
        config: StorageConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            config,
            metrics,
        }
    }
}

impl StorageFactory for MemoryStorageFactory {
    fn create_storage(&self, name: &str, kind: StorageKind) -> Box<dyn Storage> {
        match kind {
            StorageKind::Plain => Box::new(MemoryStorage::new(name)),
            StorageKind::AppendOnly => Box::new(CompressedAppendStorage::new(
                Box::new(MemoryStorage::new(name)),
                Box::new(MemoryStorage::new(format!("{name}{COMPRESSED_BLOCKS_SUFFIX}"))),
                Box::new(MemoryStorage::new(format!("{name}{COMPRESSED_HEADER_SUFFIX}"))),
                &self.config,
                Arc::clone(&self.metrics),
            )),
        }
    }

    fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    fn location(&self) -> String {
        format!("memory:{}", self.table_name)
    }
}
