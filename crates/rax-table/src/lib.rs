//! # Rax Table
//!
//! Embedded, append-optimized log tables.
//!
//! A table stores timestamped text logs tagged with any number of
//! categories and answers time-range queries with skip/take paging. Older
//! payload data is compressed transparently by the storage layer.
//!
//! ## Features
//!
//! - **Batch appends**: one contiguous write per structure per batch
//! - **Category registry**: names stored once, per-category counts and bounds
//! - **Per-minute time index**: range queries cost one bucket per elapsed minute
//! - **Ordering check**: batches that go back in time are rejected by default
//!
//! ## Example
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use rax_table::{NewLog, TableConfig, open_in_memory_table};
//!
//! let start = Utc::now();
//! let mut table = open_in_memory_table("example", TableConfig::default().with_bootstrap_timestamp(start))?;
//!
//! table.append_logs(&[
//!     NewLog::new("disk almost full", ["WARNING", "disk"], start + Duration::minutes(1)),
//!     NewLog::new("disk full", ["ERROR", "disk"], start + Duration::minutes(2)),
//! ])?;
//!
//! let logs = table.get_logs(start, start + Duration::minutes(2), 0, 10)?;
//! assert_eq!(logs.len(), 3);
//! assert_eq!(logs[2].text, "disk full");
//! # Ok::<(), rax_table::TableError>(())
//! ```

pub mod category;
pub mod config;
pub mod entry;
pub mod error;
pub mod layout;
pub mod table;
pub mod time_index;

// Re-exports
pub use category::{CategoryInfo, CategoryRegistry};
pub use config::{DEFAULT_MAX_CATEGORY_NAME_BYTES, OrderingPolicy, TableConfig};
pub use entry::{LogEntry, NewLog};
pub use error::TableError;
pub use table::{BUILTIN_CATEGORIES, LogTable, SYSTEM_CATEGORY, SYSTEM_READY_TEXT};
pub use time_index::{LogRange, MinuteKey, TimeIndex};

use std::path::Path;
use std::sync::Arc;

use rax_storage::{FileStorageFactory, MemoryStorageFactory, MetricsRegistry};

/// Open the table stored in `dir`, creating the directory and the table if needed
pub fn open_table(dir: impl AsRef<Path>, config: TableConfig) -> Result<LogTable, TableError> {
    let factory = FileStorageFactory::new(
        dir,
        config.storage.clone(),
        Arc::new(MetricsRegistry::new()),
    )?;
    LogTable::open(Box::new(factory), config)
}

/// Create a table that lives in memory only
pub fn open_in_memory_table(
    name: impl Into<String>,
    config: TableConfig,
) -> Result<LogTable, TableError> {
    let factory = MemoryStorageFactory::new(
        name,
        config.storage.clone(),
        Arc::new(MetricsRegistry::new()),
    );
    LogTable::open(Box::new(factory), config)
}
