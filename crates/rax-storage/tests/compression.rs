//! Integration tests for the compressed append storage
//!
//! These tests drive the compressed stream through its public factory
//! surface, with random chunk sizes crossing block boundaries and reopen
//! from files.

use std::sync::Arc;
use std::thread;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rax_storage::metrics::keys;
use rax_storage::{
    FileStorageFactory, MemoryStorageFactory, MetricsRegistry, Storage, StorageConfig,
    StorageError, StorageFactory, StorageKind,
};
use tempfile::TempDir;

/// Bytes that compress somewhat but are not trivially repetitive
fn log_like_bytes(rng: &mut StdRng, len: usize) -> Vec<u8> {
    const WORDS: [&[u8]; 6] = [b"INFO ", b"request ", b"served ", b"in ", b"ms ", b"\n"];
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        if rng.random_bool(0.8) {
            out.extend_from_slice(WORDS[rng.random_range(0..WORDS.len())]);
        } else {
            out.push(rng.random_range(b'0'..=b'9'));
        }
    }
    out.truncate(len);
    out
}

/// Append `total` bytes in random chunks, returning what was written
fn append_random_chunks(
    storage: &mut dyn Storage,
    rng: &mut StdRng,
    total: usize,
    max_chunk: usize,
) -> Vec<u8> {
    let mut written = Vec::with_capacity(total);
    while written.len() < total {
        let len = rng.random_range(1..=max_chunk).min(total - written.len());
        let chunk = log_like_bytes(rng, len);
        storage.write_at(written.len() as u64, &chunk).unwrap();
        written.extend_from_slice(&chunk);
    }
    written
}

fn assert_random_windows(storage: &mut dyn Storage, expected: &[u8], rng: &mut StdRng) {
    for _ in 0..500 {
        let start = rng.random_range(0..expected.len());
        let len = rng.random_range(1..=(expected.len() - start).min(5_000));
        let mut buf = vec![0u8; len];
        storage.read_at(start as u64, &mut buf).unwrap();
        assert_eq!(buf, expected[start..start + len], "window {start}+{len}");
    }
}

// ============================================================================
// Round Trip Tests
// ============================================================================

/// Test that arbitrary chunking reproduces the exact byte stream
#[test]
fn test_round_trip_random_chunks_memory() {
    let mut rng = StdRng::seed_from_u64(7);
    let metrics = Arc::new(MetricsRegistry::new());
    let config = StorageConfig::default().with_block_size_threshold(16 * 1024);
    let factory = MemoryStorageFactory::new("roundtrip", config, metrics.clone());

    let mut storage = factory.create_storage("_LOGS_DATA.BIN", StorageKind::AppendOnly);
    storage.create().unwrap();

    let expected = append_random_chunks(storage.as_mut(), &mut rng, 300_000, 3_000);

    let blocks = metrics.get(keys::COMPRESSED_BLOCKS_COUNT).unwrap();
    let processed = metrics.get(keys::TOTAL_PROCESSED_BYTES).unwrap();
    let tail = metrics.get(keys::UNCOMPRESSED_TAIL_SIZE).unwrap();
    assert!(blocks > 10, "expected many sealed blocks, got {blocks}");
    assert_eq!(processed + tail, expected.len() as i64);

    // full sequential read
    let mut all = vec![0u8; expected.len()];
    storage.read_at(0, &mut all).unwrap();
    assert_eq!(all, expected);

    assert_random_windows(storage.as_mut(), &expected, &mut rng);
}

/// Test that a single write larger than the threshold seals immediately
#[test]
fn test_oversized_single_write() {
    let mut rng = StdRng::seed_from_u64(11);
    let config = StorageConfig::default().with_block_size_threshold(1_000);
    let factory = MemoryStorageFactory::new("big", config, Arc::default());

    let mut storage = factory.create_storage("data", StorageKind::AppendOnly);
    storage.create().unwrap();

    let big = log_like_bytes(&mut rng, 50_000);
    storage.write_at(0, &big).unwrap();
    assert_eq!(
        factory.metrics().get(keys::TOTAL_PROCESSED_BYTES),
        Some(50_000)
    );

    let mut buf = vec![0u8; 50_000];
    storage.read_at(0, &mut buf).unwrap();
    assert_eq!(buf, big);
}

/// Test compression metrics move the way a reader of them expects
#[test]
fn test_compression_ratio_published() {
    let mut rng = StdRng::seed_from_u64(3);
    let metrics = Arc::new(MetricsRegistry::new());
    let config = StorageConfig::default().with_block_size_threshold(8 * 1024);
    let factory = MemoryStorageFactory::new("ratio", config, metrics.clone());

    let mut storage = factory.create_storage("data", StorageKind::AppendOnly);
    storage.create().unwrap();
    assert_eq!(metrics.compression_ratio(), None);

    append_random_chunks(storage.as_mut(), &mut rng, 100_000, 1_000);

    let ratio = metrics.compression_ratio().unwrap();
    assert!(ratio > 0.0 && ratio < 1.0, "ratio {ratio}");
    assert_eq!(
        metrics.names(),
        vec![
            keys::COMPRESSED_BLOCKS_COUNT.to_string(),
            keys::TOTAL_COMPRESSED_BYTES.to_string(),
            keys::TOTAL_PROCESSED_BYTES.to_string(),
            keys::UNCOMPRESSED_TAIL_SIZE.to_string(),
        ]
    );
}

// ============================================================================
// Persistence Tests
// ============================================================================

/// Test that blocks, offsets and tail survive a close and reopen from disk
#[test]
fn test_reopen_from_files() {
    let temp_dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let config = StorageConfig::default().with_block_size_threshold(32 * 1024);

    let expected = {
        let factory =
            FileStorageFactory::new(temp_dir.path(), config.clone(), Arc::default()).unwrap();
        let mut storage = factory.create_storage("_logs_data.bin", StorageKind::AppendOnly);
        storage.create().unwrap();
        let expected = append_random_chunks(storage.as_mut(), &mut rng, 200_000, 4_000);
        storage.flush().unwrap();
        storage.close().unwrap();
        expected
    };

    let metrics = Arc::new(MetricsRegistry::new());
    let factory = FileStorageFactory::new(temp_dir.path(), config, metrics.clone()).unwrap();
    let mut storage = factory.create_storage("_logs_data.bin", StorageKind::AppendOnly);
    assert!(storage.exists());
    storage.open().unwrap();

    assert!(metrics.get(keys::COMPRESSED_BLOCKS_COUNT).unwrap() > 0);
    assert_random_windows(storage.as_mut(), &expected, &mut rng);

    // appending after reopen continues the same logical stream
    let more = log_like_bytes(&mut rng, 70_000);
    storage.write_at(expected.len() as u64, &more).unwrap();
    let mut buf = vec![0u8; 1_000];
    let start = expected.len() - 500;
    storage.read_at(start as u64, &mut buf).unwrap();
    assert_eq!(&buf[..500], &expected[start..]);
    assert_eq!(&buf[500..], &more[..500]);
}

/// Test that a truncated offset table is detected on open
#[test]
fn test_inconsistent_header_is_corruption() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::default().with_block_size_threshold(100);
    let factory = FileStorageFactory::new(temp_dir.path(), config, Arc::default()).unwrap();

    {
        let mut storage = factory.create_storage("data", StorageKind::AppendOnly);
        storage.create().unwrap();
        storage.write_at(0, &[1u8; 150]).unwrap();
        storage.close().unwrap();
    }

    // bump total_processed_bytes so it no longer matches the blocks
    {
        let mut header = factory.create_storage("data.LZ4-HEAD", StorageKind::Plain);
        header.open().unwrap();
        header.write_at(20, &999u64.to_le_bytes()).unwrap();
        header.close().unwrap();
    }

    let mut storage = factory.create_storage("data", StorageKind::AppendOnly);
    let err = storage.open().unwrap_err();
    assert!(matches!(err, StorageError::Corrupted(_)));
}

// ============================================================================
// Concurrency Tests
// ============================================================================

/// Test that metric readers run alongside a writer publishing into the registry
#[test]
fn test_metrics_read_while_writing() {
    let metrics = Arc::new(MetricsRegistry::new());
    let config = StorageConfig::default().with_block_size_threshold(4 * 1024);
    let factory = MemoryStorageFactory::new("concurrent", config, metrics.clone());

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let metrics = Arc::clone(&metrics);
            thread::spawn(move || {
                let mut last = 0;
                for _ in 0..10_000 {
                    if let Some(processed) = metrics.get(keys::TOTAL_PROCESSED_BYTES) {
                        // processed bytes never go backwards
                        assert!(processed >= last);
                        last = processed;
                    }
                }
            })
        })
        .collect();

    let start = Instant::now();
    let mut storage = factory.create_storage("data", StorageKind::AppendOnly);
    storage.create().unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let written = append_random_chunks(storage.as_mut(), &mut rng, 500_000, 2_000);
    println!(
        "Wrote {} bytes in {:?} while readers polled metrics",
        written.len(),
        start.elapsed()
    );

    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(
        metrics.get(keys::TOTAL_PROCESSED_BYTES).unwrap()
            + metrics.get(keys::UNCOMPRESSED_TAIL_SIZE).unwrap(),
        written.len() as i64
    );
}
