//! Storage configuration

use serde::{Deserialize, Serialize};

/// Pending tail size after which the tail is sealed into a compressed block
pub const DEFAULT_BLOCK_SIZE_THRESHOLD: usize = 2_000_000;

/// Configuration shared by every storage a factory hands out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Approximate size of one compressed block.
    ///
    /// A write that would grow the uncompressed tail past this many bytes
    /// seals the tail (plus the write) into a new block.
    pub block_size_threshold: usize,
    /// Call `sync_data` on every flush of a file-backed storage
    pub sync_on_flush: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            block_size_threshold: DEFAULT_BLOCK_SIZE_THRESHOLD,
            sync_on_flush: false,
        }
    }
}

impl StorageConfig {
    /// Set the block sealing threshold
    pub fn with_block_size_threshold(mut self, bytes: usize) -> Self {
        self.block_size_threshold = bytes.max(1);
        self
    }

    /// Enable or disable `sync_data` on flush
    pub fn with_sync_on_flush(mut self, sync: bool) -> Self {
        self.sync_on_flush = sync;
        self
    }

    /// Threshold clamped to what the tail length field can hold
    pub(crate) fn effective_block_threshold(&self) -> usize {
        self.block_size_threshold.clamp(1, u32::MAX as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert_eq!(config.block_size_threshold, 2_000_000);
        assert!(!config.sync_on_flush);
    }

    #[test]
    fn test_builder_setters() {
        let config = StorageConfig::default()
            .with_block_size_threshold(0)
            .with_sync_on_flush(true);
        // zero would seal on every write of nothing; clamp to one byte
        assert_eq!(config.block_size_threshold, 1);
        assert!(config.sync_on_flush);
    }

    #[test]
    fn test_effective_threshold_clamped() {
        let config = StorageConfig {
            block_size_threshold: usize::MAX,
            sync_on_flush: false,
        };
        assert_eq!(config.effective_block_threshold(), u32::MAX as usize);
    }
}
