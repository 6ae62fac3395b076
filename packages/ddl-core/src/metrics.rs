//! Counters and timers emitted by the DDL coordination loops.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Time spent loading pending jobs in one dispatch round.
pub const LOAD_DDL_JOBS: &str = "load_ddl_jobs";
/// Wall time of one job delivery, from worker borrow to release.
pub const DDL_JOB_RUN: &str = "ddl_job_run";
/// Time spent moving a finished job to history.
pub const HANDLE_JOB_DONE: &str = "handle_job_done";
/// Number of schema-diff deletion rounds.
pub const DEL_SCHEMA_DIFF: &str = "del_schema_diff";
/// Time spent waiting for convergence on a new schema version.
pub const MDL_WAIT_CHANGED: &str = "mdl_wait_changed";

/// Destination for DDL metrics.
pub trait MetricsSink: Send + Sync {
    fn incr_counter(&self, name: &'static str);
    fn record_timer(&self, name: &'static str, elapsed: Duration);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(&self, _name: &'static str) {}
    fn record_timer(&self, _name: &'static str, _elapsed: Duration) {}
}

/// Aggregate of one timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimerStats {
    pub count: u64,
    pub total_ns: u64,
    pub max_ns: u64,
}

/// In-process metrics, readable back for logging and tests.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    /// Total number of events recorded, counters and timers together.
    events: AtomicU64,
    counters: Mutex<BTreeMap<&'static str, u64>>,
    timers: Mutex<BTreeMap<&'static str, TimerStats>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|c| c.get(name).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn timer(&self, name: &str) -> TimerStats {
        self.timers
            .lock()
            .map(|t| t.get(name).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn timer_count(&self, name: &str) -> u64 {
        self.timer(name).count
    }

    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_counter(&self, name: &'static str) {
        self.events.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(name).or_insert(0) += 1;
        }
    }

    fn record_timer(&self, name: &'static str, elapsed: Duration) {
        self.events.fetch_add(1, Ordering::Relaxed);
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        if let Ok(mut timers) = self.timers.lock() {
            let stats = timers.entry(name).or_default();
            stats.count += 1;
            stats.total_ns = stats.total_ns.saturating_add(ns);
            stats.max_ns = stats.max_ns.max(ns);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_timers_accumulate() {
        let metrics = InMemoryMetrics::new();
        metrics.incr_counter(DEL_SCHEMA_DIFF);
        metrics.incr_counter(DEL_SCHEMA_DIFF);
        metrics.record_timer(DDL_JOB_RUN, Duration::from_millis(3));
        metrics.record_timer(DDL_JOB_RUN, Duration::from_millis(1));

        assert_eq!(metrics.counter(DEL_SCHEMA_DIFF), 2);
        assert_eq!(metrics.counter(LOAD_DDL_JOBS), 0);
        let run = metrics.timer(DDL_JOB_RUN);
        assert_eq!(run.count, 2);
        assert_eq!(run.max_ns, 3_000_000);
        assert_eq!(metrics.events(), 4);
    }
}
