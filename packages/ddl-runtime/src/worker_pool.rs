//! Bounded pool of job workers.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use ddl_core::DdlError;

use crate::context::DdlContext;
use crate::worker::JobWorker;
use crate::Result;

const BORROW_WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<usize>,
    created: usize,
}

/// Hands out at most `worker_pool_size` workers at a time.
pub struct JobWorkerPool {
    ctx: Arc<DdlContext>,
    max_workers: usize,
    state: Mutex<PoolState>,
    returned: Condvar,
}

impl JobWorkerPool {
    pub fn new(ctx: Arc<DdlContext>) -> Arc<Self> {
        let max_workers = ctx.config.worker_pool_size.max(1);
        Arc::new(Self {
            ctx,
            max_workers,
            state: Mutex::new(PoolState::default()),
            returned: Condvar::new(),
        })
    }

    /// Borrows a worker, growing the pool or blocking until one is returned.
    pub fn borrow(self: &Arc<Self>) -> Result<PooledWorker> {
        let mut state = self.state.lock();
        loop {
            let id = if let Some(id) = state.idle.pop() {
                Some(id)
            } else if state.created < self.max_workers {
                state.created += 1;
                Some(state.created)
            } else {
                None
            };
            if let Some(id) = id {
                return Ok(PooledWorker {
                    worker: JobWorker::new(id, Arc::clone(&self.ctx)),
                    pool: Arc::clone(self),
                });
            }
            if self.ctx.shutdown.is_triggered() {
                return Err(DdlError::Shutdown);
            }
            self.returned.wait_for(&mut state, BORROW_WAIT_SLICE);
        }
    }

    /// Workers currently lent out.
    pub fn in_use(&self) -> usize {
        let state = self.state.lock();
        state.created - state.idle.len()
    }

    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    fn give_back(&self, id: usize) {
        self.state.lock().idle.push(id);
        self.returned.notify_one();
    }
}

/// A borrowed worker; returned to its pool when dropped.
pub struct PooledWorker {
    worker: JobWorker,
    pool: Arc<JobWorkerPool>,
}

impl Deref for PooledWorker {
    type Target = JobWorker;

    fn deref(&self) -> &JobWorker {
        &self.worker
    }
}

impl Drop for PooledWorker {
    fn drop(&mut self) {
        self.pool.give_back(self.worker.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddl_core::config::DdlConfig;
    use ddl_core::memory::InMemoryCluster;
    use std::thread;
    use std::time::Instant;

    fn pool(size: usize) -> Arc<JobWorkerPool> {
        let cluster = InMemoryCluster::new();
        let config = DdlConfig {
            worker_pool_size: size,
            ..Default::default()
        };
        JobWorkerPool::new(DdlContext::new("n1", config, cluster.node().collaborators))
    }

    #[test]
    fn test_grows_then_reuses() {
        let pool = pool(2);
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.in_use(), 2);
        let freed = a.id();
        drop(a);
        let c = pool.borrow().unwrap();
        assert_eq!(c.id(), freed);
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn test_exhausted_pool_blocks_until_return() {
        let pool = pool(1);
        let held = pool.borrow().unwrap();
        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let worker = pool.borrow().unwrap();
                (worker.id(), start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);
        let (id, waited) = waiter.join().unwrap();
        assert_eq!(id, 1);
        assert!(waited >= Duration::from_millis(40));
    }

    #[test]
    fn test_borrow_fails_on_shutdown() {
        let pool = pool(1);
        let _held = pool.borrow().unwrap();
        pool.ctx.shutdown.trigger();
        assert!(matches!(pool.borrow(), Err(DdlError::Shutdown)));
    }
}
