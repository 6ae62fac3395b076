use std::sync::Arc;

use super::{
    LocalTimestampSource, MemoryCatalog, MemoryCoordinator, MemoryJobTable, MemoryLockRegistry,
    MemoryReorg, MemorySessionPool,
};
use crate::metrics::{InMemoryMetrics, MetricsSink};
use crate::store::Collaborators;

/// Shared services of a simulated cluster.
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    pub catalog: Arc<MemoryCatalog>,
    pub job_table: Arc<MemoryJobTable>,
    pub coordinator: Arc<MemoryCoordinator>,
    pub timestamps: Arc<LocalTimestampSource>,
    pub reorg: Arc<MemoryReorg>,
}

/// Collaborators of one simulated node plus handles to its local parts.
pub struct MemoryNode {
    pub collaborators: Collaborators,
    pub sessions: Arc<MemorySessionPool>,
    pub locks: Arc<MemoryLockRegistry>,
    pub metrics: Arc<InMemoryMetrics>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires a new node to the shared services.
    pub fn node(&self) -> MemoryNode {
        let sessions = Arc::new(MemorySessionPool::new());
        let locks = Arc::new(MemoryLockRegistry::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let sink: Arc<dyn MetricsSink> = metrics.clone();
        MemoryNode {
            collaborators: Collaborators {
                job_table: self.job_table.clone(),
                catalog: self.catalog.clone(),
                coordination: self.coordinator.clone(),
                timestamps: self.timestamps.clone(),
                sessions: sessions.clone(),
                locks: locks.clone(),
                reorg: self.reorg.clone(),
                metrics: sink,
            },
            sessions,
            locks,
            metrics,
        }
    }
}
