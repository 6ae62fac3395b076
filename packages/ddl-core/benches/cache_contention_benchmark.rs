//! Schema cache lock contention benchmark.
//!
//! - Baseline: single reader resolving the latest snapshot
//! - Readers racing a writer that publishes new versions
//! - Exact-version lookups against a full cache

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ddl_core::schema::{ColumnInfo, SchemaInfo, TableInfo};
use ddl_core::{SchemaSnapshot, VersionedSchemaCache};
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Builds a snapshot with `tables` tables in one schema.
fn populated_snapshot(version: i64, tables: i64) -> SchemaSnapshot {
    let mut snapshot = SchemaSnapshot::new(version);
    snapshot.put_schema(SchemaInfo::new(1, "bench"));
    for id in 0..tables {
        snapshot.put_table(
            1,
            TableInfo::new(
                1000 + id,
                &format!("t_{}", id),
                vec![ColumnInfo::new("id", "BIGINT", false)],
            ),
        );
    }
    snapshot
}

fn benchmark_single_reader_baseline(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_reader_baseline");
    group.sample_size(20);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(2));

    let cache = VersionedSchemaCache::new(16);
    cache.insert(Arc::new(populated_snapshot(1, 100)));

    group.bench_function("latest", |b| {
        b.iter(|| black_box(cache.latest().map(|s| s.table_by_id(1050).is_some())))
    });

    group.finish();
}

fn benchmark_readers_with_writer(c: &mut Criterion) {
    let mut group = c.benchmark_group("readers_with_writer");
    group.sample_size(15);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    for readers in [1usize, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("readers", readers),
            readers,
            |b, &readers| {
                b.iter_custom(|iters| {
                    let cache = Arc::new(VersionedSchemaCache::new(16));
                    let base = populated_snapshot(1, 100);
                    cache.insert(Arc::new(base.clone()));
                    let stop = Arc::new(AtomicBool::new(false));

                    let writer = {
                        let cache = cache.clone();
                        let stop = stop.clone();
                        thread::spawn(move || {
                            let mut version = 2;
                            while !stop.load(Ordering::Relaxed) {
                                cache.insert(Arc::new(base.with_version(version)));
                                version += 1;
                            }
                        })
                    };

                    let start = Instant::now();
                    let handles: Vec<_> = (0..readers)
                        .map(|_| {
                            let cache = cache.clone();
                            thread::spawn(move || {
                                for _ in 0..iters {
                                    black_box(cache.latest());
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    let elapsed = start.elapsed();

                    stop.store(true, Ordering::Relaxed);
                    writer.join().unwrap();
                    elapsed
                })
            },
        );
    }

    group.finish();
}

fn benchmark_by_version_full_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("by_version_full_cache");
    group.sample_size(20);

    let cache = VersionedSchemaCache::new(16);
    for version in 1..=16 {
        cache.insert(Arc::new(SchemaSnapshot::new(version)));
    }

    for version in [16i64, 8, 1].iter() {
        group.bench_with_input(BenchmarkId::new("version", version), version, |b, &v| {
            b.iter(|| black_box(cache.by_version(v)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_single_reader_baseline,
    benchmark_readers_with_writer,
    benchmark_by_version_full_cache
);
criterion_main!(benches);
