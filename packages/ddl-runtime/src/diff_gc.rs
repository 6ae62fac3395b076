//! Background deletion of old schema diffs.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ddl_core::metrics::DEL_SCHEMA_DIFF;
use ddl_core::retry::retry_transient;

use crate::context::DdlContext;
use crate::event_source::BoundedQueue;

const TAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// Versions whose older diffs may be deleted, drained by the owner only.
pub struct DiffGcQueue {
    ctx: Arc<DdlContext>,
    versions: BoundedQueue<i64>,
}

impl DiffGcQueue {
    pub fn new(ctx: Arc<DdlContext>) -> Arc<Self> {
        let versions = BoundedQueue::new("ddl_diff_gc", ctx.config.diff_gc_queue_capacity);
        Arc::new(Self { ctx, versions })
    }

    /// Queues `version` for collection; dropped with a warning when full.
    pub fn enqueue(&self, version: i64) {
        if self.versions.try_put(version).is_err() {
            tracing::warn!(
                "Queue '{}' is full, skipping diff cleanup for version {}",
                self.versions.name(),
                version
            );
        }
    }

    pub fn pending(&self) -> usize {
        self.versions.len()
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let gc = Arc::clone(self);
        thread::spawn(move || gc.run())
    }

    fn run(&self) {
        let ctx = &self.ctx;
        while !ctx.shutdown.is_triggered() {
            if !ctx.is_owner() {
                ctx.shutdown.sleep(ctx.config.non_owner_poll_interval());
                continue;
            }
            if let Some(version) = self.versions.take_timeout(TAKE_TIMEOUT) {
                self.collect(version);
            }
        }
    }

    /// Deletes diffs older than `version - diff_gc_retain`.
    ///
    /// Nothing is deleted at or below `diff_gc_min_version`.
    pub fn collect(&self, version: i64) -> usize {
        let config = &self.ctx.config;
        if version <= config.diff_gc_min_version {
            return 0;
        }
        let upto = version - config.diff_gc_retain;
        let catalog = &self.ctx.collaborators.catalog;
        match retry_transient(
            || catalog.del_schema_diff(upto),
            config.store_max_retries,
            config.store_retry_delay_ms,
            "delete schema diffs",
        ) {
            Ok(removed) => {
                self.ctx.collaborators.metrics.incr_counter(DEL_SCHEMA_DIFF);
                tracing::debug!("Deleted {} schema diffs up to version {}", removed, upto);
                removed
            }
            Err(e) => {
                tracing::warn!("Failed to delete schema diffs up to {}: {}", upto, e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddl_core::config::DdlConfig;
    use ddl_core::memory::InMemoryCluster;
    use ddl_core::schema::{ActionType, SchemaDiff};
    use ddl_core::store::CatalogStore;

    fn seeded(versions: i64) -> (InMemoryCluster, Arc<DiffGcQueue>) {
        let cluster = InMemoryCluster::new();
        for _ in 0..versions {
            let mut diff = SchemaDiff::new(ActionType::AddColumn, 1, 10);
            diff.version = cluster.catalog.gen_schema_version().unwrap();
            cluster.catalog.set_schema_diff(&diff).unwrap();
        }
        let config = DdlConfig {
            diff_gc_min_version: 10,
            diff_gc_retain: 5,
            diff_gc_queue_capacity: 2,
            ..Default::default()
        };
        let ctx = DdlContext::new("n1", config, cluster.node().collaborators);
        (cluster, DiffGcQueue::new(ctx))
    }

    #[test]
    fn test_low_versions_are_kept() {
        let (cluster, gc) = seeded(10);
        assert_eq!(gc.collect(10), 0);
        assert_eq!(cluster.catalog.diff_versions().len(), 10);
    }

    #[test]
    fn test_retains_recent_diffs() {
        let (cluster, gc) = seeded(12);
        assert_eq!(gc.collect(12), 7);
        assert_eq!(cluster.catalog.diff_versions(), vec![8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_full_queue_drops_versions() {
        let (_cluster, gc) = seeded(0);
        gc.enqueue(11);
        gc.enqueue(12);
        gc.enqueue(13);
        assert_eq!(gc.pending(), 2);
    }
}
