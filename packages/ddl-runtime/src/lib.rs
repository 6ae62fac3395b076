//! Owner-side DDL job execution and cluster-wide schema convergence

use ddl_core::error::DdlError;

pub mod context;
pub mod diff_gc;
pub mod dispatch;
pub mod event_source;
pub mod loader;
pub mod mdl_check;
pub mod node;
pub mod submit;
pub mod sync;
pub mod watch;
pub mod worker;
pub mod worker_pool;

pub use context::{DdlContext, Ownership, Shutdown};
pub use event_source::{JobEvent, JobEventSource};
pub use node::{DdlNode, NodeHandle, NodeStatus};
pub use sync::{Convergence, SchemaSyncer};
pub use worker::JobWorker;
pub use worker_pool::{JobWorkerPool, PooledWorker};

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, DdlError>;
