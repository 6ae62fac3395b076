//! Versioned schema snapshot cache.
//!
//! Holds the most recent snapshots sorted by version descending: index 0 is
//! the newest. Readers (query compilation) take the shared lock and never
//! block each other; `insert` and `reset` take the exclusive lock.

use std::sync::{Arc, PoisonError, RwLock};

use crate::schema::SchemaSnapshot;

#[derive(Debug)]
struct CacheInner {
    /// Snapshots, newest first; never longer than `capacity`.
    entries: Vec<Arc<SchemaSnapshot>>,
    capacity: usize,
    max_updated_snapshot_ts: i64,
}

impl CacheInner {
    /// First position whose version is <= `version`, or the tail.
    fn floor_index(&self, version: i64) -> usize {
        self.entries
            .iter()
            .position(|s| s.version() <= version)
            .unwrap_or(self.entries.len())
    }
}

/// Bounded cache of the most recent schema snapshots.
#[derive(Debug)]
pub struct VersionedSchemaCache {
    inner: RwLock<CacheInner>,
}

impl VersionedSchemaCache {
    /// Creates an empty cache holding at most `capacity` snapshots.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: Vec::with_capacity(capacity),
                capacity,
                max_updated_snapshot_ts: 0,
            }),
        }
    }

    /// Inserts a snapshot, keeping the cache sorted by version descending.
    ///
    /// Re-inserting a resident version is a no-op returning `true`. When the
    /// cache is full the oldest snapshot is evicted; a snapshot older than
    /// every entry of a full cache is not kept and `false` is returned.
    pub fn insert(&self, snapshot: Arc<SchemaSnapshot>) -> bool {
        self.insert_with_ts(snapshot, 0)
    }

    /// Like [`insert`](Self::insert), also tracking the newest snapshot timestamp.
    pub fn insert_with_ts(&self, snapshot: Arc<SchemaSnapshot>, snapshot_ts: i64) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let version = snapshot.version();
        let ix = inner.floor_index(version);

        if inner.max_updated_snapshot_ts < snapshot_ts {
            inner.max_updated_snapshot_ts = snapshot_ts;
        }

        if inner
            .entries
            .get(ix)
            .is_some_and(|existing| existing.version() == version)
        {
            return true;
        }

        if ix >= inner.capacity {
            return false;
        }
        inner.entries.insert(ix, snapshot);
        let capacity = inner.capacity;
        inner.entries.truncate(capacity);
        true
    }

    /// Newest snapshot.
    pub fn latest(&self) -> Option<Arc<SchemaSnapshot>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.first().cloned()
    }

    /// Version of the newest snapshot, 0 when empty.
    pub fn latest_version(&self) -> i64 {
        self.latest().map(|s| s.version()).unwrap_or(0)
    }

    /// Snapshot with exactly `version`, if still resident.
    ///
    /// Callers receiving `None` must rebuild from the durable catalog.
    pub fn by_version(&self, version: i64) -> Option<Arc<SchemaSnapshot>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let ix = inner.floor_index(version);
        inner
            .entries
            .get(ix)
            .filter(|s| s.version() == version)
            .cloned()
    }

    /// Newest snapshot whose version is <= `version`.
    pub fn floor(&self, version: i64) -> Option<Arc<SchemaSnapshot>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let ix = inner.floor_index(version);
        inner.entries.get(ix).cloned()
    }

    /// Drops every snapshot and sets a new capacity.
    pub fn reset(&self, capacity: usize) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.entries = Vec::with_capacity(capacity);
        inner.capacity = capacity;
    }

    /// Resident versions, newest first.
    pub fn versions(&self) -> Vec<i64> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.iter().map(|s| s.version()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .capacity
    }

    /// Largest snapshot timestamp seen by `insert_with_ts`.
    pub fn max_updated_snapshot_ts(&self) -> i64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .max_updated_snapshot_ts
    }
}
