//! Compressed append-only storage
//!
//! Presents one logical, append-only, randomly readable byte stream on top of
//! three plain storages:
//!
//! - the **tail**: bytes written since the last block was sealed, uncompressed
//! - the **blocks**: immutable LZ4 blocks, each prefixed by an 8-byte header
//! - the **index**: a fixed header followed by the offset of every block
//!
//! ## Storage Format
//!
//! ```text
//! index:  [40 bytes: CompressedStorageHeader][8 bytes: block 0 offset][8 bytes: block 1 offset]...
//! blocks: [4 bytes: compressed len][4 bytes: original len][compressed bytes]...
//! tail:   [remaining_bytes_in_uncompressed_tail bytes of raw data]
//! ```
//!
//! A write that would grow the tail past the block threshold takes the
//! whole pending tail plus the new bytes, compresses them into a new block
//! and empties the tail. Sealed blocks are never rewritten.

use std::sync::Arc;

use tracing::{debug, error, info, trace};

use crate::Storage;
use crate::codec::{FixedLayout, RecordIo, get_u32, get_u64, put_u32, put_u64};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::metrics::{MetricsRegistry, keys};

/// Width of the per-block header in the block storage
pub const BLOCK_HEADER_SIZE: u64 = 8;

/// Persisted header of a compressed stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressedStorageHeader {
    /// Number of sealed blocks
    pub compressed_blocks_count: u32,
    /// Where the next block goes in the block storage
    pub next_compressed_block_offset: u64,
    /// Sum of compressed sizes (block headers excluded)
    pub total_compressed_bytes: u64,
    /// Logical bytes covered by sealed blocks
    pub total_processed_bytes: u64,
    /// Logical bytes waiting in the tail
    pub remaining_bytes_in_uncompressed_tail: u32,
    /// Largest compressed block so far
    pub max_compressed_buffer_size: u64,
}

impl CompressedStorageHeader {
    /// Logical length of the whole stream
    pub fn logical_len(&self) -> u64 {
        self.total_processed_bytes + u64::from(self.remaining_bytes_in_uncompressed_tail)
    }
}

impl FixedLayout for CompressedStorageHeader {
    const SIZE: usize = 40;

    fn encode(&self, out: &mut [u8]) {
        put_u32(out, 0, self.compressed_blocks_count);
        put_u64(out, 4, self.next_compressed_block_offset);
        put_u64(out, 12, self.total_compressed_bytes);
        put_u64(out, 20, self.total_processed_bytes);
        put_u32(out, 28, self.remaining_bytes_in_uncompressed_tail);
        put_u64(out, 32, self.max_compressed_buffer_size);
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            compressed_blocks_count: get_u32(bytes, 0),
            next_compressed_block_offset: get_u64(bytes, 4),
            total_compressed_bytes: get_u64(bytes, 12),
            total_processed_bytes: get_u64(bytes, 20),
            remaining_bytes_in_uncompressed_tail: get_u32(bytes, 28),
            max_compressed_buffer_size: get_u64(bytes, 32),
        }
    }
}

/// In-memory view of one sealed block
#[derive(Debug, Clone, Copy)]
struct BlockInfo {
    /// Offset of the block header in the block storage
    offset: u64,
    /// First logical byte covered by the block
    logical_start: u64,
    compressed_len: u32,
    original_len: u32,
}

impl BlockInfo {
    fn logical_end(&self) -> u64 {
        self.logical_start + u64::from(self.original_len)
    }
}

fn encode_block_header(compressed_len: u32, original_len: u32) -> [u8; 8] {
    let mut out = [0u8; 8];
    put_u32(&mut out, 0, compressed_len);
    put_u32(&mut out, 4, original_len);
    out
}

/// Append-only storage with transparent LZ4 block compression
#[derive(Debug)]
pub struct CompressedAppendStorage {
    tail: Box<dyn Storage>,
    blocks: Box<dyn Storage>,
    index: Box<dyn Storage>,
    header: CompressedStorageHeader,
    /// Sealed blocks in creation order, loaded from the offset table on open
    block_infos: Vec<BlockInfo>,
    /// Logical cursor
    position: u64,
    block_threshold: usize,
    /// Decompressed bytes of `cached_block`
    scratch: Vec<u8>,
    cached_block: Option<usize>,
    /// Compressed bytes read back from the block storage
    compressed_buf: Vec<u8>,
    metrics: Arc<MetricsRegistry>,
}

impl CompressedAppendStorage {
    /// Compose a compressed stream from its three backing storages
    pub fn new(
        tail: Box<dyn Storage>,
        blocks: Box<dyn Storage>,
        index: Box<dyn Storage>,
        config: &StorageConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            tail,
            blocks,
            index,
            header: CompressedStorageHeader::default(),
            block_infos: Vec::new(),
            position: 0,
            block_threshold: config.effective_block_threshold(),
            scratch: Vec::new(),
            cached_block: None,
            compressed_buf: Vec::new(),
            metrics,
        }
    }

    /// Current persisted header
    pub fn header(&self) -> &CompressedStorageHeader {
        &self.header
    }

    /// Offsets of every sealed block in the block storage
    pub fn block_offsets(&self) -> Vec<u64> {
        self.block_infos.iter().map(|b| b.offset).collect()
    }

    fn write_header(&mut self) -> Result<(), StorageError> {
        let header = self.header;
        self.index.write_record_at(0, &header)
    }

    fn publish_metrics(&self) {
        self.metrics.set(
            keys::COMPRESSED_BLOCKS_COUNT,
            i64::from(self.header.compressed_blocks_count),
        );
        self.metrics
            .set(keys::TOTAL_COMPRESSED_BYTES, self.header.total_compressed_bytes as i64);
        self.metrics
            .set(keys::TOTAL_PROCESSED_BYTES, self.header.total_processed_bytes as i64);
        self.publish_tail_size();
    }

    fn publish_tail_size(&self) {
        self.metrics.set(
            keys::UNCOMPRESSED_TAIL_SIZE,
            i64::from(self.header.remaining_bytes_in_uncompressed_tail),
        );
    }

    fn reset_runtime_state(&mut self) {
        self.block_infos.clear();
        self.position = 0;
        self.cached_block = None;
    }

    /// Load the offset table and every block header
    fn load_blocks(&mut self) -> Result<(), StorageError> {
        let count = self.header.compressed_blocks_count as usize;
        self.block_infos.reserve(count);

        let mut raw_offsets = vec![0u8; count * 8];
        if count > 0 {
            self.index
                .read_at(CompressedStorageHeader::SIZE as u64, &mut raw_offsets)?;
        }

        let mut logical_start = 0u64;
        let mut block_header = [0u8; BLOCK_HEADER_SIZE as usize];
        for chunk in raw_offsets.chunks_exact(8) {
            let offset = get_u64(chunk, 0);
            self.blocks.read_at(offset, &mut block_header)?;
            let info = BlockInfo {
                offset,
                logical_start,
                compressed_len: get_u32(&block_header, 0),
                original_len: get_u32(&block_header, 4),
            };
            logical_start = info.logical_end();
            self.block_infos.push(info);
        }

        if logical_start != self.header.total_processed_bytes {
            return Err(StorageError::corrupted(format!(
                "blocks cover {} bytes but header records {}",
                logical_start, self.header.total_processed_bytes
            )));
        }
        Ok(())
    }

    /// Make `scratch` hold the decompressed bytes of block `block`
    fn load_block(&mut self, block: usize) -> Result<(), StorageError> {
        if self.cached_block == Some(block) {
            return Ok(());
        }
        let info = self.block_infos[block];
        let compressed_len = info.compressed_len as usize;
        let original_len = info.original_len as usize;

        self.compressed_buf.resize(compressed_len, 0);
        self.blocks
            .read_at(info.offset + BLOCK_HEADER_SIZE, &mut self.compressed_buf)?;

        if self.scratch.len() < original_len {
            self.scratch.resize(original_len + original_len / 2, 0);
        }
        // drop the cache first so a failed decode never leaves a stale block behind
        self.cached_block = None;
        let decoded = lz4_flex::block::decompress_into(
            &self.compressed_buf,
            &mut self.scratch[..original_len],
        )?;
        if decoded != original_len {
            return Err(StorageError::corrupted(format!(
                "block {block} decoded to {decoded} bytes, header says {original_len}"
            )));
        }

        trace!(block, original_len, compressed_len, "Decompressed block");
        self.cached_block = Some(block);
        Ok(())
    }

    /// Seal `raw` as a new immutable block
    fn append_block(&mut self, raw: &[u8]) -> Result<(), StorageError> {
        let original_len =
            u32::try_from(raw.len()).map_err(|_| StorageError::BlockTooLarge(raw.len()))?;
        let compressed = lz4_flex::block::compress(raw);
        let compressed_len = u32::try_from(compressed.len())
            .map_err(|_| StorageError::BlockTooLarge(compressed.len()))?;

        let offset = self.header.next_compressed_block_offset;

        // data first, then the offset entry, then the header that makes both visible
        self.blocks
            .write_at(offset, &encode_block_header(compressed_len, original_len))?;
        self.blocks.write(&compressed)?;

        let mut entry = [0u8; 8];
        put_u64(&mut entry, 0, offset);
        let entry_offset = CompressedStorageHeader::SIZE as u64
            + u64::from(self.header.compressed_blocks_count) * 8;
        self.index.write_at(entry_offset, &entry)?;

        let logical_start = self.header.total_processed_bytes;
        self.header.compressed_blocks_count += 1;
        self.header.next_compressed_block_offset += u64::from(compressed_len) + BLOCK_HEADER_SIZE;
        self.header.total_compressed_bytes += u64::from(compressed_len);
        self.header.total_processed_bytes += u64::from(original_len);
        self.header.remaining_bytes_in_uncompressed_tail = 0;
        self.header.max_compressed_buffer_size = self
            .header
            .max_compressed_buffer_size
            .max(u64::from(compressed_len));
        self.write_header()?;

        self.block_infos.push(BlockInfo {
            offset,
            logical_start,
            compressed_len,
            original_len,
        });

        debug!(
            block = self.header.compressed_blocks_count - 1,
            original_len,
            compressed_len,
            "Sealed compressed block"
        );
        self.publish_metrics();
        Ok(())
    }
}

impl Storage for CompressedAppendStorage {
    fn name(&self) -> &str {
        self.tail.name()
    }

    fn exists(&self) -> bool {
        self.tail.exists()
    }

    fn create(&mut self) -> Result<(), StorageError> {
        self.index.create()?;
        self.tail.create()?;
        self.blocks.create()?;

        self.header = CompressedStorageHeader::default();
        self.reset_runtime_state();
        self.write_header()?;
        self.publish_metrics();
        Ok(())
    }

    fn open(&mut self) -> Result<(), StorageError> {
        self.index.open()?;
        self.tail.open()?;
        self.blocks.open()?;

        self.header = self.index.read_record_at(0)?;
        self.reset_runtime_state();
        self.load_blocks()?;

        info!(
            name = self.tail.name(),
            blocks = self.header.compressed_blocks_count,
            processed = self.header.total_processed_bytes,
            tail = self.header.remaining_bytes_in_uncompressed_tail,
            "Opened compressed storage"
        );
        self.publish_metrics();
        Ok(())
    }

    fn delete(&mut self) -> Result<(), StorageError> {
        self.index.delete()?;
        self.tail.delete()?;
        self.blocks.delete()?;
        self.header = CompressedStorageHeader::default();
        self.reset_runtime_state();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.tail.is_open() && self.blocks.is_open() && self.index.is_open()
    }

    fn set_position(&mut self, offset: u64) -> Result<(), StorageError> {
        if !self.is_open() {
            return Err(StorageError::closed(self.tail.name()));
        }
        self.position = offset;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<(), StorageError> {
        if !self.is_open() {
            return Err(StorageError::closed(self.tail.name()));
        }
        let mut offset = self.position;
        let mut filled = 0usize;
        let sealed_until = self.header.total_processed_bytes;

        while filled < buf.len() && offset < sealed_until {
            let block = self
                .block_infos
                .partition_point(|info| info.logical_end() <= offset);
            self.load_block(block)?;

            let info = self.block_infos[block];
            let within = (offset - info.logical_start) as usize;
            let take = (info.original_len as usize - within).min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&self.scratch[within..within + take]);

            filled += take;
            offset += take as u64;
        }

        if filled < buf.len() {
            let relative = offset - sealed_until;
            let wanted = (buf.len() - filled) as u64;
            let available = u64::from(self.header.remaining_bytes_in_uncompressed_tail);
            if relative + wanted > available {
                error!(
                    name = self.tail.name(),
                    offset,
                    wanted,
                    available,
                    "Read past the uncompressed tail, stream is corrupted"
                );
                return Err(StorageError::TailOverrun {
                    requested: relative + wanted,
                    available,
                });
            }
            self.tail.read_at(relative, &mut buf[filled..])?;
            offset += wanted;
        }

        self.position = offset;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        if !self.is_open() {
            return Err(StorageError::closed(self.tail.name()));
        }
        let sealed_until = self.header.total_processed_bytes;
        if self.position < sealed_until {
            return Err(StorageError::SealedRegion {
                offset: self.position,
                sealed_until,
            });
        }

        let relative = (self.position - sealed_until) as usize;
        let expected_tail = relative + buf.len();

        if expected_tail > self.block_threshold {
            let mut raw = vec![0u8; expected_tail];
            if relative > 0 {
                self.tail.read_at(0, &mut raw[..relative])?;
            }
            raw[relative..].copy_from_slice(buf);
            self.append_block(&raw)?;
        } else {
            self.tail.write_at(relative as u64, buf)?;
            // bounded by block_threshold, which never exceeds u32::MAX
            self.header.remaining_bytes_in_uncompressed_tail = expected_tail as u32;
            self.write_header()?;
            self.publish_tail_size();
        }

        self.position += buf.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.tail.flush()?;
        self.index.flush()?;
        self.blocks.flush()
    }

    fn close(&mut self) -> Result<(), StorageError> {
        self.index.close()?;
        self.tail.close()?;
        self.blocks.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStorage;

    fn memory_stream(threshold: usize) -> (CompressedAppendStorage, Arc<MetricsRegistry>) {
        let metrics = Arc::new(MetricsRegistry::new());
        let config = StorageConfig::default().with_block_size_threshold(threshold);
        let mut storage = CompressedAppendStorage::new(
            Box::new(MemoryStorage::new("data")),
            Box::new(MemoryStorage::new("data.LZ4")),
            Box::new(MemoryStorage::new("data.LZ4-HEAD")),
            &config,
            metrics.clone(),
        );
        storage.create().unwrap();
        (storage, metrics)
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8 / 7).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_header_layout() {
        let header = CompressedStorageHeader {
            compressed_blocks_count: 2,
            next_compressed_block_offset: 300,
            total_compressed_bytes: 284,
            total_processed_bytes: 1000,
            remaining_bytes_in_uncompressed_tail: 17,
            max_compressed_buffer_size: 150,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), 40);
        assert_eq!(get_u32(&bytes, 0), 2);
        assert_eq!(get_u64(&bytes, 20), 1000);
        assert_eq!(get_u32(&bytes, 28), 17);
        assert_eq!(CompressedStorageHeader::decode(&bytes), header);
        assert_eq!(header.logical_len(), 1017);
    }

    #[test]
    fn test_small_writes_stay_in_tail() {
        let (mut storage, metrics) = memory_stream(1024);
        storage.write_at(0, b"first ").unwrap();
        storage.write(b"second").unwrap();

        assert_eq!(storage.header().compressed_blocks_count, 0);
        assert_eq!(storage.header().remaining_bytes_in_uncompressed_tail, 12);
        assert_eq!(metrics.get(keys::UNCOMPRESSED_TAIL_SIZE), Some(12));

        let mut buf = [0u8; 12];
        storage.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf, b"first second");
    }

    #[test]
    fn test_threshold_seals_block() {
        let (mut storage, metrics) = memory_stream(100);
        let first = pattern(60, 1);
        let second = pattern(60, 2);

        storage.write_at(0, &first).unwrap();
        storage.write_at(60, &second).unwrap();

        let header = *storage.header();
        assert_eq!(header.compressed_blocks_count, 1);
        assert_eq!(header.total_processed_bytes, 120);
        assert_eq!(header.remaining_bytes_in_uncompressed_tail, 0);
        assert_eq!(storage.block_offsets(), vec![0]);
        assert_eq!(metrics.get(keys::COMPRESSED_BLOCKS_COUNT), Some(1));
        assert_eq!(metrics.get(keys::TOTAL_PROCESSED_BYTES), Some(120));
        assert_eq!(metrics.get(keys::UNCOMPRESSED_TAIL_SIZE), Some(0));

        let mut buf = vec![0u8; 120];
        storage.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[..60], first.as_slice());
        assert_eq!(&buf[60..], second.as_slice());
    }

    #[test]
    fn test_read_spanning_blocks_and_tail() {
        let (mut storage, _) = memory_stream(50);
        let mut expected = Vec::new();
        for i in 0..10u8 {
            let chunk = pattern(23, i);
            storage.write_at(expected.len() as u64, &chunk).unwrap();
            expected.extend_from_slice(&chunk);
        }
        assert!(storage.header().compressed_blocks_count >= 3);
        assert!(storage.header().remaining_bytes_in_uncompressed_tail > 0);

        // every window, including ones starting inside the tail
        for start in [0usize, 10, 49, 71, 150, 200, 229] {
            let len = (expected.len() - start).min(40);
            let mut buf = vec![0u8; len];
            storage.read_at(start as u64, &mut buf).unwrap();
            assert_eq!(buf, expected[start..start + len], "window at {start}");
        }
    }

    #[test]
    fn test_tail_overrun_is_error() {
        let (mut storage, _) = memory_stream(1024);
        storage.write_at(0, b"abc").unwrap();

        let mut buf = [0u8; 4];
        let err = storage.read_at(0, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            StorageError::TailOverrun {
                requested: 4,
                available: 3
            }
        ));
    }

    #[test]
    fn test_write_into_sealed_region_rejected() {
        let (mut storage, _) = memory_stream(10);
        storage.write_at(0, &pattern(20, 0)).unwrap();

        let err = storage.write_at(5, b"x").unwrap_err();
        assert!(matches!(
            err,
            StorageError::SealedRegion {
                offset: 5,
                sealed_until: 20
            }
        ));
    }

    #[test]
    fn test_closed_stream_rejects_io() {
        let (mut storage, _) = memory_stream(10);
        storage.write_at(0, &pattern(20, 3)).unwrap();
        assert_eq!(storage.header().compressed_blocks_count, 1);

        // leaves the sealed block decoded in the scratch buffer
        let mut buf = [0u8; 5];
        storage.read_at(0, &mut buf).unwrap();

        storage.close().unwrap();
        assert!(!storage.is_open());
        assert!(matches!(storage.read(&mut buf), Err(StorageError::Closed(_))));
        assert!(matches!(storage.write(b"x"), Err(StorageError::Closed(_))));
        assert!(matches!(storage.set_position(0), Err(StorageError::Closed(_))));
    }
}
