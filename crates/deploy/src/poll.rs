//! Polling helper for remote operations that complete asynchronously.

use std::{future::Future, time::Duration};

use anyhow::Result;

/// Repeatedly call `check_fn` until it yields a value.
///
/// # Arguments
/// * `name` - What is being waited for (for logs and error messages)
/// * `timeout` - Maximum time to wait
/// * `interval` - Delay between two checks
/// * `check_fn` - Returns `Ok(Some(_))` when done, `Ok(None)` to keep waiting
///
/// # Returns
/// The value produced by `check_fn`. An error from `check_fn` is returned immediately;
/// running out of time is an error too.
pub async fn wait_until<T, F, Fut>(
    name: &str,
    timeout: Duration,
    interval: Duration,
    mut check_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = tokio::time::Instant::now();

    loop {
        if let Some(value) = check_fn().await? {
            return Ok(value);
        }

        if start.elapsed() > timeout {
            anyhow::bail!("Timeout waiting for {} after {:?}", name, timeout);
        }

        tracing::trace!(operation = %name, "Not settled yet, polling again...");
        tokio::time::sleep(interval).await;
    }
}
