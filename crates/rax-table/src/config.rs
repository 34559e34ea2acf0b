//! Table configuration

use chrono::{DateTime, Utc};
use rax_storage::StorageConfig;
use serde::{Deserialize, Serialize};

/// Default limit for the UTF-8 length of one category name
pub const DEFAULT_MAX_CATEGORY_NAME_BYTES: usize = 1024;

/// What `append_logs` does with timestamps that go backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Reject the whole batch with [`crate::TableError::OutOfOrder`]
    #[default]
    Reject,
    /// Skip the check. Callers guarantee non-decreasing timestamps; if they
    /// don't, range queries return wrong records.
    Trust,
}

/// Configuration for a log table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Configuration handed to the table's storage factory
    pub storage: StorageConfig,
    /// Longest accepted category name, in UTF-8 bytes
    pub max_category_name_bytes: usize,
    /// Timestamp ordering check on append
    pub ordering: OrderingPolicy,
    /// Timestamp of the bootstrap record written when a table is created.
    /// `None` uses the current time.
    pub bootstrap_timestamp: Option<DateTime<Utc>>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            max_category_name_bytes: DEFAULT_MAX_CATEGORY_NAME_BYTES,
            ordering: OrderingPolicy::default(),
            bootstrap_timestamp: None,
        }
    }
}

impl TableConfig {
    /// Set the storage configuration
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Set the category name length limit
    pub fn with_max_category_name_bytes(mut self, bytes: usize) -> Self {
        self.max_category_name_bytes = bytes;
        self
    }

    /// Set the ordering policy
    pub fn with_ordering(mut self, ordering: OrderingPolicy) -> Self {
        self.ordering = ordering;
        self
    }

    /// Pin the bootstrap record's timestamp
    pub fn with_bootstrap_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.bootstrap_timestamp = Some(timestamp);
        self
    }
}
