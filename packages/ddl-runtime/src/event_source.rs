//! Local event queues that wake the dispatcher and the version checker.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use ddl_core::DdlError;

use crate::context::DdlContext;
use crate::Result;

/// Upper bound of a single blocking wait inside the queues, so that shutdown
/// and ownership changes are observed promptly.
const QUEUE_WAIT_SLICE: Duration = Duration::from_millis(100);

/// Notification delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// A job was submitted or a previous job finished.
    NewJob,
    /// Schemas may have changed; carries the observed global version (0 from the ticker).
    VersionCheck(i64),
}

/// Callback invoked for each dequeued event.
pub type Listener = Box<dyn Fn(&JobEvent) -> Result<()> + Send + Sync>;

/// Bounded FIFO with blocking take and retrying put.
pub struct BoundedQueue<T> {
    name: &'static str,
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Appends without waiting; hands the item back when the queue is full.
    pub fn try_put(&self, item: T) -> std::result::Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Appends, waiting for space until shutdown is signalled.
    pub fn put(&self, item: T, shutdown: &crate::context::Shutdown) -> Result<()> {
        let mut items = self.items.lock();
        let mut warned = false;
        loop {
            if items.len() < self.capacity {
                items.push_back(item);
                self.not_empty.notify_one();
                return Ok(());
            }
            if shutdown.is_triggered() {
                return Err(DdlError::Shutdown);
            }
            if !warned {
                tracing::warn!("Queue '{}' is full, retrying put", self.name);
                warned = true;
            }
            self.not_full.wait_for(&mut items, QUEUE_WAIT_SLICE);
        }
    }

    /// Takes the head item, waiting at most `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let mut items = self.items.lock();
        if items.is_empty() {
            self.not_empty.wait_for(&mut items, timeout);
        }
        let item = items.pop_front()?;
        self.not_full.notify_one();
        Some(item)
    }

    /// Puts a taken item back at the head.
    pub fn requeue_front(&self, item: T) {
        self.items.lock().push_front(item);
        self.not_empty.notify_one();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Two queues ("new job" and "version check") with one consumer each.
///
/// Only the owner drains the job queue; events pushed elsewhere stay queued
/// until this node is elected. Version checks are consumed on every node.
pub struct JobEventSource {
    ctx: Arc<DdlContext>,
    jobs: BoundedQueue<JobEvent>,
    version_checks: BoundedQueue<JobEvent>,
    job_listeners: RwLock<Vec<Listener>>,
    version_listeners: RwLock<Vec<Listener>>,
}

impl JobEventSource {
    pub fn new(ctx: Arc<DdlContext>) -> Arc<Self> {
        let jobs = BoundedQueue::new("ddl_job", ctx.config.job_queue_capacity);
        let version_checks =
            BoundedQueue::new("ddl_version_check", ctx.config.version_check_queue_capacity);
        Arc::new(Self {
            ctx,
            jobs,
            version_checks,
            job_listeners: RwLock::new(Vec::new()),
            version_listeners: RwLock::new(Vec::new()),
        })
    }

    /// Registers a listener for "new job" events.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&JobEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.job_listeners.write().push(Box::new(listener));
    }

    /// Registers a listener for "version check" events.
    pub fn add_version_check_listener<F>(&self, listener: F)
    where
        F: Fn(&JobEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.version_listeners.write().push(Box::new(listener));
    }

    pub fn notify_new_job(&self) -> Result<()> {
        self.jobs.put(JobEvent::NewJob, &self.ctx.shutdown)
    }

    pub fn notify_version_check(&self, version: i64) -> Result<()> {
        self.version_checks
            .put(JobEvent::VersionCheck(version), &self.ctx.shutdown)
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn pending_version_checks(&self) -> usize {
        self.version_checks.len()
    }

    /// Spawns both consumer threads.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let jobs = {
            let source = Arc::clone(self);
            thread::spawn(move || source.consume_jobs())
        };
        let versions = {
            let source = Arc::clone(self);
            thread::spawn(move || source.consume_version_checks())
        };
        vec![jobs, versions]
    }

    fn consume_jobs(&self) {
        let ctx = &self.ctx;
        tracing::debug!("Job event consumer started on node {}", ctx.node_id);
        while !ctx.shutdown.is_triggered() {
            if !ctx.is_owner() {
                ctx.shutdown.sleep(ctx.config.non_owner_poll_interval());
                continue;
            }
            let Some(event) = self.jobs.take_timeout(QUEUE_WAIT_SLICE) else {
                continue;
            };
            if !ctx.is_owner() {
                tracing::debug!("Lost ownership after dequeue, requeueing {:?}", event);
                self.jobs.requeue_front(event);
                continue;
            }
            Self::dispatch(&self.job_listeners, &event);
        }
        tracing::debug!("Job event consumer stopped on node {}", ctx.node_id);
    }

    fn consume_version_checks(&self) {
        let ctx = &self.ctx;
        while !ctx.shutdown.is_triggered() {
            if let Some(event) = self.version_checks.take_timeout(QUEUE_WAIT_SLICE) {
                Self::dispatch(&self.version_listeners, &event);
            }
        }
    }

    /// Invokes every listener in registration order; failures are logged only.
    fn dispatch(listeners: &RwLock<Vec<Listener>>, event: &JobEvent) {
        let listeners = listeners.read();
        for (ix, listener) in listeners.iter().enumerate() {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Listener {} failed on {:?}: {}", ix, event, e);
                }
                Err(panic) => {
                    let panic_msg = if let Some(msg) = panic.downcast_ref::<&str>() {
                        msg.to_string()
                    } else if let Some(msg) = panic.downcast_ref::<String>() {
                        msg.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    tracing::error!("Listener {} panicked on {:?}: {}", ix, event, panic_msg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Shutdown;

    #[test]
    fn test_queue_is_fifo_and_bounded() {
        let queue = BoundedQueue::new("test", 2);
        assert!(queue.try_put(1).is_ok());
        assert!(queue.try_put(2).is_ok());
        assert_eq!(queue.try_put(3), Err(3));
        assert_eq!(queue.take_timeout(Duration::from_millis(1)), Some(1));
        queue.requeue_front(1);
        assert_eq!(queue.take_timeout(Duration::from_millis(1)), Some(1));
        assert_eq!(queue.take_timeout(Duration::from_millis(1)), Some(2));
        assert_eq!(queue.take_timeout(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_put_gives_up_on_shutdown() {
        let queue = BoundedQueue::new("test", 1);
        let shutdown = Shutdown::new();
        queue.put(1, &shutdown).unwrap();
        shutdown.trigger();
        assert_eq!(queue.put(2, &shutdown), Err(DdlError::Shutdown));
    }
}
