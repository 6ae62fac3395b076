//! Retry helper for transient store failures.

use std::time::Duration;

use crate::error::DdlError;

/// Retries an operation that may fail with retryable errors.
///
/// Non-retryable errors are returned immediately; retryable ones are
/// retried up to `max_retries` times with `retry_delay_ms` between attempts.
pub fn retry_transient<F, T>(
    mut operation: F,
    max_retries: u32,
    retry_delay_ms: u64,
    context: &str,
) -> Result<T, DdlError>
where
    F: FnMut() -> Result<T, DdlError>,
{
    let mut attempt = 0;
    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempt += 1;
                if attempt > max_retries || !err.is_retryable() {
                    return Err(err);
                }

                tracing::warn!(
                    "Transient error in {} (attempt {}/{}): {}",
                    context,
                    attempt,
                    max_retries,
                    err
                );

                if retry_delay_ms > 0 {
                    std::thread::sleep(Duration::from_millis(retry_delay_ms));
                }
            }
        }
    }
}
