//! Fixed-delay retry for operations that may fail transiently.

use std::future::Future;
use std::time::Duration;

use hostel_core::error::Result;

/// Attempts made by whole-list reads before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Run `op` up to `max_attempts` times, sleeping `delay` between attempts.
///
/// Only errors for which [`is_transient`] holds are retried; anything else
/// (a 4xx answer, a rejected session) is returned immediately. The last error
/// is returned once the attempts are exhausted.
///
/// [`is_transient`]: hostel_core::HostelError::is_transient
pub async fn retry<T, F, Fut>(max_attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(attempt, max_attempts, error = %e, "attempt failed; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 1 {
                    tracing::warn!(attempt, error = %e, "giving up after retries");
                }
                return Err(e);
            }
        }
    }
}
