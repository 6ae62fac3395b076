//! DDL coordination configuration.

use std::time::Duration;

/// Convergence strategy used by the owner before declaring a job synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStrategyKind {
    /// Wait for every node's self-version key, bounded by twice the lease.
    #[default]
    Lease,
    /// Wait for per-job metadata-lock acknowledgments from every node.
    MetadataLock,
}

/// DDL coordination configuration.
#[derive(Debug, Clone)]
pub struct DdlConfig {
    /// Schema lease in milliseconds; convergence waits are bounded by 2 x lease
    pub lease_ms: u64,
    /// Number of schema snapshots kept by the versioned cache
    pub schema_cache_capacity: usize,
    /// Capacity of the "new job" event queue
    pub job_queue_capacity: usize,
    /// Capacity of the "version check" event queue
    pub version_check_queue_capacity: usize,
    /// Capacity of the deferred schema-diff deletion queue
    pub diff_gc_queue_capacity: usize,
    /// How often a non-owner re-checks ownership before draining queues
    pub non_owner_poll_interval_ms: u64,
    /// Sleep applied when the dispatcher runs while this node is not the owner
    pub owner_wait_interval_ms: u64,
    /// Delay before the first backstop dispatch tick
    pub schedule_initial_delay_ms: u64,
    /// Fixed delay between backstop dispatch ticks
    pub schedule_interval_ms: u64,
    /// Poll interval used by convergence waits
    pub sync_poll_interval_ms: u64,
    /// Interval of the version-check ticker that refreshes schemas on every node
    pub version_check_interval_ms: u64,
    /// Delay before re-establishing a broken coordination watch
    pub watch_retry_delay_ms: u64,
    /// Upper bound of live job workers
    pub worker_pool_size: usize,
    /// Convergence strategy
    pub sync_strategy: SyncStrategyKind,
    /// Enqueue synced versions for deferred schema-diff deletion
    pub delete_schema_diffs: bool,
    /// Versions at or below this value never trigger diff deletion
    pub diff_gc_min_version: i64,
    /// Number of most recent diffs kept when deleting
    pub diff_gc_retain: i64,
    /// Maximum retry attempts for transient store errors
    pub store_max_retries: u32,
    /// Delay between retry attempts in milliseconds
    pub store_retry_delay_ms: u64,
}

impl DdlConfig {
    /// Schema lease.
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    /// Deadline of one convergence wait (twice the lease).
    pub fn sync_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_ms.saturating_mul(2))
    }

    pub fn non_owner_poll_interval(&self) -> Duration {
        Duration::from_millis(self.non_owner_poll_interval_ms)
    }

    pub fn owner_wait_interval(&self) -> Duration {
        Duration::from_millis(self.owner_wait_interval_ms)
    }

    pub fn schedule_initial_delay(&self) -> Duration {
        Duration::from_millis(self.schedule_initial_delay_ms)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms)
    }

    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_poll_interval_ms)
    }

    pub fn version_check_interval(&self) -> Duration {
        Duration::from_millis(self.version_check_interval_ms)
    }

    pub fn watch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.watch_retry_delay_ms)
    }
}

impl Default for DdlConfig {
    fn default() -> Self {
        Self {
            lease_ms: 45_000,
            schema_cache_capacity: 16,
            job_queue_capacity: 1000,
            version_check_queue_capacity: 1000,
            diff_gc_queue_capacity: 10_000,
            non_owner_poll_interval_ms: 5000,
            owner_wait_interval_ms: 1000,
            schedule_initial_delay_ms: 10_000,
            schedule_interval_ms: 1000,
            sync_poll_interval_ms: 50,
            version_check_interval_ms: 500,
            watch_retry_delay_ms: 1000,
            worker_pool_size: 8,
            sync_strategy: SyncStrategyKind::Lease,
            delete_schema_diffs: true,
            diff_gc_min_version: 220,
            diff_gc_retain: 110,
            store_max_retries: 3,      // Default retry attempts
            store_retry_delay_ms: 100, // 100ms delay between retries
        }
    }
}
