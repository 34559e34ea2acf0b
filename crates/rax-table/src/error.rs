//! Error types for rax-table

use chrono::{DateTime, Utc};
use rax_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in table operations
#[derive(Debug, Error)]
pub enum TableError {
    /// Failure in one of the table's storages
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A batch contains a record earlier than the one before it
    #[error("Log {index} of the batch at {timestamp} is earlier than preceding log at {previous}")]
    OutOfOrder {
        index: usize,
        previous: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// A category name is longer than the configured limit
    #[error("Category name of {length} bytes exceeds the limit of {max} bytes")]
    CategoryNameTooLong { length: usize, max: usize },

    /// Log text does not fit the record's length field
    #[error("Log text of {0} bytes is too long")]
    TextTooLong(usize),

    /// A single log names more categories than a record can hold
    #[error("Log references {0} categories, too many for one record")]
    TooManyCategories(usize),

    /// Persisted table data is inconsistent
    #[error("Corrupted table: {0}")]
    Corrupted(String),

    /// A timestamp outside the representable range
    #[error("Invalid timestamp: {0} microseconds")]
    InvalidTimestamp(i64),
}

impl TableError {
    /// Create a new Corrupted error
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
