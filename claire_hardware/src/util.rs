use std::time::{Duration, Instant};

use crate::error::{HwError, Result};

/// Poll `ready` until it yields a value or `timeout` expires.
/// Sleeps `poll_interval` between attempts to avoid CPU spinning.
pub fn poll_until<T>(
    mut ready: impl FnMut() -> Result<Option<T>>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(v) = ready()? {
            return Ok(v);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(HwError::Timeout);
        }
        std::thread::sleep(poll_interval.min(deadline - now));
    }
}
