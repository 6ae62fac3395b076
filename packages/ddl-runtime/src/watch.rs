//! Long-lived coordination watches.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ddl_core::store::WatchEvent;

use crate::context::DdlContext;

/// Upper bound of one blocking read from a watch stream.
const WATCH_POLL: Duration = Duration::from_millis(100);

/// Watches `key` until shutdown, calling `on_event` for every change.
///
/// A broken or unavailable watch is logged and re-established after
/// `watch_retry_delay`.
pub fn spawn_watch<F>(ctx: Arc<DdlContext>, key: String, on_event: F) -> JoinHandle<()>
where
    F: Fn(WatchEvent) + Send + 'static,
{
    thread::spawn(move || {
        let coordination = Arc::clone(&ctx.collaborators.coordination);
        while !ctx.shutdown.is_triggered() {
            let mut stream = match coordination.watch(&key) {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!("Failed to watch '{}': {}", key, e);
                    ctx.shutdown.sleep(ctx.config.watch_retry_delay());
                    continue;
                }
            };
            tracing::debug!("Watching '{}' on node {}", key, ctx.node_id);

            while !ctx.shutdown.is_triggered() {
                match stream.next(WATCH_POLL) {
                    Ok(WatchEvent::Idle) => {}
                    Ok(event) => on_event(event),
                    Err(e) => {
                        tracing::warn!("Watch on '{}' broke: {}", key, e);
                        ctx.shutdown.sleep(ctx.config.watch_retry_delay());
                        break;
                    }
                }
            }
        }
        tracing::debug!("Watch on '{}' stopped", key);
    })
}

/// Runs `tick` every `interval` until shutdown.
pub fn spawn_ticker<F>(ctx: Arc<DdlContext>, interval: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn() + Send + 'static,
{
    thread::spawn(move || {
        while ctx.shutdown.sleep(interval) {
            tick();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddl_core::config::DdlConfig;
    use ddl_core::memory::InMemoryCluster;
    use ddl_core::store::CoordinationService;
    use ntest::timeout;
    use std::sync::mpsc;

    #[test]
    #[timeout(5000)]
    fn test_watch_survives_outage() {
        let cluster = InMemoryCluster::new();
        let config = DdlConfig {
            watch_retry_delay_ms: 10,
            ..Default::default()
        };
        let ctx = DdlContext::new("n1", config, cluster.node().collaborators);
        let (tx, rx) = mpsc::channel();
        let handle = spawn_watch(ctx.clone(), "k".to_string(), move |event| {
            let _ = tx.send(event);
        });

        while cluster.coordinator.watches_opened() < 1 {
            thread::sleep(Duration::from_millis(5));
        }
        cluster.coordinator.put("k", 1).unwrap();
        assert_eq!(rx.recv().unwrap(), WatchEvent::Put(1));

        cluster.coordinator.set_available(false);
        thread::sleep(Duration::from_millis(50));
        cluster.coordinator.set_available(true);
        while cluster.coordinator.watches_opened() < 2 {
            thread::sleep(Duration::from_millis(5));
        }
        cluster.coordinator.put("k", 2).unwrap();
        assert_eq!(rx.recv().unwrap(), WatchEvent::Put(2));

        ctx.shutdown.trigger();
        handle.join().unwrap();
    }
}
