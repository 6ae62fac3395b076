//! In-process collaborators.
//!
//! A shared [`InMemoryCluster`] plays the durable job table, catalog,
//! coordination service and timestamp oracle; every simulated node gets its
//! own sessions and metadata-lock registry from [`InMemoryCluster::node`].
//! Used by the server binary and by tests, with fault injection hooks.

mod catalog;
mod cluster;
mod coordinator;
mod job_table;
mod locks;
mod reorg;
mod session;
mod timestamp;

pub use catalog::MemoryCatalog;
pub use cluster::{InMemoryCluster, MemoryNode};
pub use coordinator::{MemoryCoordinator, MemoryWatch};
pub use job_table::MemoryJobTable;
pub use locks::MemoryLockRegistry;
pub use reorg::MemoryReorg;
pub use session::{MemorySession, MemorySessionPool};
pub use timestamp::LocalTimestampSource;
