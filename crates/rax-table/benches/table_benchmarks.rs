//! Log table performance benchmarks
//!
//! Benchmarks for the hot paths of a table:
//! - Batched appends
//! - Paged range queries
//! - Compressed payload stream writes and reads
//!
//! Run with: cargo bench -p rax-table

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rax_storage::{MemoryStorageFactory, Storage, StorageConfig, StorageFactory, StorageKind};
use rax_table::{LogTable, NewLog, TableConfig, open_in_memory_table};

const CATEGORIES: [&str; 7] = ["TRACE", "DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "AUDIT"];

// ============================================================================
// Helpers
// ============================================================================

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn make_batch(cursor: &mut DateTime<Utc>, seq: &mut u64, len: usize) -> Vec<NewLog> {
    (0..len)
        .map(|_| {
            *seq += 1;
            *cursor += Duration::milliseconds(250);
            let category = CATEGORIES[(*seq % CATEGORIES.len() as u64) as usize];
            NewLog::new(
                format!("request {seq} served in {} ms", *seq % 97),
                [category, "http"],
                *cursor,
            )
        })
        .collect()
}

fn filled_table(logs: usize) -> (LogTable, DateTime<Utc>) {
    let mut table =
        open_in_memory_table("bench", TableConfig::default().with_bootstrap_timestamp(start()))
            .unwrap();
    let mut cursor = start();
    let mut seq = 0;
    for _ in 0..logs / 10_000 {
        table
            .append_logs(&make_batch(&mut cursor, &mut seq, 10_000))
            .unwrap();
    }
    (table, cursor)
}

// ============================================================================
// Append Benchmarks
// ============================================================================

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    group.sample_size(20);

    for batch_len in [100usize, 10_000] {
        group.throughput(Throughput::Elements(batch_len as u64));
        group.bench_function(format!("batch_{batch_len}"), |b| {
            let (mut table, mut cursor) = filled_table(0);
            let mut seq = 0;
            b.iter(|| {
                let batch = make_batch(&mut cursor, &mut seq, batch_len);
                table.append_logs(black_box(&batch)).unwrap();
            })
        });
    }

    group.finish();
}

// ============================================================================
// Query Benchmarks
// ============================================================================

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let (table, end) = filled_table(200_000);

    group.throughput(Throughput::Elements(100));
    group.bench_function("first_page_100", |b| {
        b.iter(|| table.get_logs(black_box(start()), black_box(end), 0, 100).unwrap())
    });

    group.bench_function("deep_page_100", |b| {
        b.iter(|| {
            table
                .get_logs(black_box(start()), black_box(end), 150_000, 100)
                .unwrap()
        })
    });

    let one_hour = start() + Duration::hours(10);
    group.bench_function("one_hour_window_100", |b| {
        b.iter(|| {
            table
                .get_logs(black_box(one_hour), one_hour + Duration::hours(1), 0, 100)
                .unwrap()
        })
    });

    group.throughput(Throughput::Elements(10_000));
    group.bench_function("page_10000", |b| {
        b.iter(|| table.get_logs(start(), end, 50_000, 10_000).unwrap())
    });

    group.finish();
}

// ============================================================================
// Compressed Stream Benchmarks
// ============================================================================

fn bench_compressed_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("compressed_stream");
    let chunk: Vec<u8> = (0..64 * 1024).map(|i| b"raxlog payload "[i % 15]).collect();

    group.throughput(Throughput::Bytes(chunk.len() as u64));
    group.bench_function("append_64k", |b| {
        let factory =
            MemoryStorageFactory::new("bench", StorageConfig::default(), Arc::default());
        let mut storage = factory.create_storage("data", StorageKind::AppendOnly);
        storage.create().unwrap();
        let mut offset = 0u64;
        b.iter(|| {
            storage.write_at(offset, black_box(&chunk)).unwrap();
            offset += chunk.len() as u64;
        })
    });

    let factory = MemoryStorageFactory::new("bench", StorageConfig::default(), Arc::default());
    let mut storage = factory.create_storage("data", StorageKind::AppendOnly);
    storage.create().unwrap();
    for i in 0..256u64 {
        storage.write_at(i * chunk.len() as u64, &chunk).unwrap();
    }
    let mut buf = vec![0u8; chunk.len()];
    group.bench_function("read_64k_across_blocks", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 37) % 255;
            storage.read_at(i * chunk.len() as u64, &mut buf).unwrap();
            black_box(&buf);
        })
    });

    group.finish();
}

criterion_group!(benches, bench_append, bench_query, bench_compressed_stream);

criterion_main!(benches);
