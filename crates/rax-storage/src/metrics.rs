//! Metrics sink
//!
//! A small keyed store of numeric values that storages publish into and
//! external tooling reads from. One registry belongs to one table; it is
//! handed to the storages through their factory.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

/// Well-known metric names published by the compressed append storage
pub mod keys {
    /// Number of sealed compressed blocks
    pub const COMPRESSED_BLOCKS_COUNT: &str = "compressed_blocks_count";
    /// Sum of compressed block sizes (without block headers)
    pub const TOTAL_COMPRESSED_BYTES: &str = "total_compressed_bytes";
    /// Sum of original sizes of all sealed blocks
    pub const TOTAL_PROCESSED_BYTES: &str = "total_processed_bytes";
    /// Bytes currently waiting in the uncompressed tail
    pub const UNCOMPRESSED_TAIL_SIZE: &str = "uncompressed_tail_size";
}

/// Thread-safe map of metric name to value
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    values: Mutex<HashMap<String, i64>>,
}

impl MetricsRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a metric value
    pub fn set(&self, key: &str, value: i64) {
        let mut values = self.values.lock();
        match values.get_mut(key) {
            Some(slot) => *slot = value,
            None => {
                values.insert(key.to_string(), value);
            }
        }
    }

    /// Get a metric value, if it was ever published
    pub fn get(&self, key: &str) -> Option<i64> {
        self.values.lock().get(key).copied()
    }

    /// Names of all published metrics, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Point-in-time copy of every metric
    pub fn snapshot(&self) -> BTreeMap<String, i64> {
        self.values
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Compressed bytes divided by processed bytes.
    ///
    /// `None` until at least one block has been sealed.
    pub fn compression_ratio(&self) -> Option<f64> {
        let values = self.values.lock();
        let compressed = *values.get(keys::TOTAL_COMPRESSED_BYTES)?;
        let processed = *values.get(keys::TOTAL_PROCESSED_BYTES)?;
        if processed <= 0 {
            return None;
        }
        Some(compressed as f64 / processed as f64)
    }

    /// Number of published metrics
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Whether nothing has been published yet
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}
