//! Bounded-attempt retry with a fixed delay.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `attempts` runs out.
///
/// Only errors carrying the [`Error::Retryable`] marker are retried; anything
/// else aborts immediately. The error surfaced to the caller is always the
/// last attempt's, with the marker stripped. `attempts` counts total tries
/// and is treated as at least 1.
pub async fn retry<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(attempt, error = %err, "operation failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into_inner()),
        }
    }
}
