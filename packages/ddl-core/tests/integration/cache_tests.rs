//! Versioned schema cache tests.

use std::sync::Arc;
use std::thread;

use ntest::timeout;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use ddl_core::schema::{ColumnInfo, SchemaInfo, TableInfo};
use ddl_core::{SchemaSnapshot, VersionedSchemaCache};

fn snapshot(version: i64) -> Arc<SchemaSnapshot> {
    Arc::new(SchemaSnapshot::new(version))
}

/// Any insert order leaves the cache strictly descending, duplicate-free,
/// holding the newest `capacity` versions.
#[test]
fn test_random_insert_order_keeps_newest_sorted() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    for _ in 0..50 {
        let capacity = rng.gen_range(1..=16);
        let mut versions: Vec<i64> = (1..=40).collect();
        versions.shuffle(&mut rng);

        let cache = VersionedSchemaCache::new(capacity);
        let mut inserted = Vec::new();
        for version in versions.iter().take(rng.gen_range(1..=40)) {
            cache.insert(snapshot(*version));
            // Re-inserting is harmless.
            if rng.gen_bool(0.2) {
                cache.insert(snapshot(*version));
            }
            inserted.push(*version);

            let resident = cache.versions();
            assert!(resident.len() <= capacity);
            assert!(resident.windows(2).all(|w| w[0] > w[1]));
        }

        // Every version newer than the cache's oldest resident entry must
        // still be resident once the cache is full.
        let resident = cache.versions();
        if resident.len() == capacity {
            let oldest = *resident.last().unwrap();
            for version in &inserted {
                if *version > oldest {
                    assert!(cache.by_version(*version).is_some());
                }
            }
        }
        let newest = *inserted.iter().max().unwrap();
        assert_eq!(cache.latest().unwrap().version(), newest);
    }
}

#[test]
fn test_floor_matches_linear_search() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let cache = VersionedSchemaCache::new(8);
    let mut resident: Vec<i64> = (0..8).map(|_| rng.gen_range(1..100)).collect();
    resident.sort_unstable();
    resident.dedup();
    for version in &resident {
        cache.insert(snapshot(*version));
    }

    for version in 0..110 {
        let expected = resident.iter().rev().find(|v| **v <= version).copied();
        assert_eq!(cache.floor(version).map(|s| s.version()), expected);
    }
}

#[test]
fn test_eviction_scenario() {
    let cache = VersionedSchemaCache::new(3);
    for version in 2..=5 {
        cache.insert(snapshot(version));
    }
    assert_eq!(cache.versions(), vec![5, 4, 3]);
    assert!(cache.by_version(2).is_none());
}

#[test]
fn test_snapshot_content_survives_insert() {
    let mut snap = SchemaSnapshot::new(7);
    snap.put_schema(SchemaInfo::new(1, "shop"));
    snap.put_table(
        1,
        TableInfo::new(20, "orders", vec![ColumnInfo::new("id", "BIGINT", false)]),
    );
    let cache = VersionedSchemaCache::new(4);
    cache.insert(Arc::new(snap));

    let latest = cache.latest().unwrap();
    assert_eq!(latest.table("shop", "orders").unwrap().id, 20);
    assert_eq!(latest.table_by_id(20).unwrap().columns.len(), 1);
}

#[test]
#[timeout(5000)]
fn test_concurrent_readers_and_writer() {
    let cache = Arc::new(VersionedSchemaCache::new(4));
    cache.insert(snapshot(1));

    let writer = {
        let cache = cache.clone();
        thread::spawn(move || {
            for version in 2..=200 {
                cache.insert(snapshot(version));
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                let mut last_seen = 0;
                for _ in 0..1000 {
                    let version = cache.latest().map(|s| s.version()).unwrap_or(0);
                    assert!(version >= last_seen, "latest went backwards");
                    last_seen = version;
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(cache.versions(), vec![200, 199, 198, 197]);
}
