use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{DdlError, Result};
use crate::store::{CoordinationService, WatchEvent, WatchStream};

#[derive(Debug)]
struct CoordinatorState {
    kv: BTreeMap<String, i64>,
    watchers: Vec<(String, Sender<WatchEvent>)>,
    available: bool,
}

/// Key-value coordination store with per-key watches.
#[derive(Debug)]
pub struct MemoryCoordinator {
    state: Mutex<CoordinatorState>,
    watches_opened: AtomicU64,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                kv: BTreeMap::new(),
                watchers: Vec::new(),
                available: true,
            }),
            watches_opened: AtomicU64::new(0),
        }
    }

    /// Simulates an outage: every call fails and open watches break.
    pub fn set_available(&self, available: bool) {
        let mut state = self.lock();
        state.available = available;
        if !available {
            state.watchers.clear();
        }
    }

    /// Number of watches ever opened.
    pub fn watches_opened(&self) -> u64 {
        self.watches_opened.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> Result<MutexGuard<'_, CoordinatorState>> {
        let state = self.lock();
        if !state.available {
            return Err(DdlError::CoordinationUnavailable(
                "coordination service offline".into(),
            ));
        }
        Ok(state)
    }

    fn notify(state: &mut CoordinatorState, key: &str, event: WatchEvent) {
        state
            .watchers
            .retain(|(watched, tx)| watched != key || tx.send(event).is_ok());
    }
}

impl CoordinationService for MemoryCoordinator {
    fn put(&self, key: &str, value: i64) -> Result<()> {
        let mut state = self.state()?;
        state.kv.insert(key.to_string(), value);
        Self::notify(&mut state, key, WatchEvent::Put(value));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.state()?.kv.get(key).copied())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state()?;
        if state.kv.remove(key).is_some() {
            Self::notify(&mut state, key, WatchEvent::Delete);
        }
        Ok(())
    }

    fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let mut state = self.state()?;
        let keys: Vec<String> = state
            .kv
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            state.kv.remove(key);
            Self::notify(&mut state, key, WatchEvent::Delete);
        }
        Ok(keys.len())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, i64)>> {
        let state = self.state()?;
        Ok(state
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }

    fn watch(&self, key: &str) -> Result<Box<dyn WatchStream>> {
        let mut state = self.state()?;
        let (tx, rx) = mpsc::channel();
        state.watchers.push((key.to_string(), tx));
        self.watches_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryWatch {
            key: key.to_string(),
            rx,
        }))
    }
}

/// Watch handed out by [`MemoryCoordinator::watch`].
#[derive(Debug)]
pub struct MemoryWatch {
    key: String,
    rx: Receiver<WatchEvent>,
}

impl WatchStream for MemoryWatch {
    fn next(&mut self, timeout: Duration) -> Result<WatchEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Ok(WatchEvent::Idle),
            Err(RecvTimeoutError::Disconnected) => Err(DdlError::CoordinationUnavailable(
                format!("watch on {} closed", self.key),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_sees_puts_and_breaks_on_outage() {
        let coordinator = MemoryCoordinator::new();
        let mut watch = coordinator.watch("k").unwrap();
        coordinator.put("k", 3).unwrap();
        coordinator.put("other", 4).unwrap();

        assert_eq!(watch.next(Duration::from_millis(10)).unwrap(), WatchEvent::Put(3));
        assert_eq!(watch.next(Duration::from_millis(10)).unwrap(), WatchEvent::Idle);

        coordinator.set_available(false);
        assert!(watch.next(Duration::from_millis(10)).is_err());
        assert!(coordinator.watch("k").is_err());
        coordinator.set_available(true);
        assert!(coordinator.watch("k").is_ok());
        assert_eq!(coordinator.watches_opened(), 2);
    }

    #[test]
    fn test_prefix_scan_and_delete() {
        let coordinator = MemoryCoordinator::new();
        coordinator.put("a/1", 1).unwrap();
        coordinator.put("a/2", 2).unwrap();
        coordinator.put("b/1", 3).unwrap();

        let scanned = coordinator.scan_prefix("a/").unwrap();
        assert_eq!(scanned, vec![("a/1".to_string(), 1), ("a/2".to_string(), 2)]);
        assert_eq!(coordinator.delete_prefix("a/").unwrap(), 2);
        assert!(coordinator.scan_prefix("a/").unwrap().is_empty());
        assert_eq!(coordinator.get("b/1").unwrap(), Some(3));
    }
}
