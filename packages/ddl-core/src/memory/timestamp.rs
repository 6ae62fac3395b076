use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::error::{DdlError, Result};
use crate::store::TimestampSource;

/// Monotonic counter standing in for the timestamp oracle.
#[derive(Debug)]
pub struct LocalTimestampSource {
    next: AtomicI64,
    available: AtomicBool,
}

impl Default for LocalTimestampSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTimestampSource {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// When false, `next_timestamp` fails with `DdlError::TimestampUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl TimestampSource for LocalTimestampSource {
    fn next_timestamp(&self) -> Result<i64> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DdlError::TimestampUnavailable("oracle offline".into()));
        }
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }
}
