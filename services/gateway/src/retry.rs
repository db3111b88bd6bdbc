use crate::config::RetryConfig;
use crate::error::Result;
use backoff::{backoff::Backoff, ExponentialBackoff};
use std::future::Future;
use tracing::warn;

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Non-transient errors (`ObjectNotFound`, `BadPayload`, ...) are returned
/// immediately; transient ones are retried until `max_attempts` is reached.
pub async fn with_backoff<T, F, Fut>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = ExponentialBackoff {
        initial_interval: config.initial_interval(),
        max_interval: config.max_interval(),
        max_elapsed_time: None, // Bounded by max_attempts instead
        ..Default::default()
    };

    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let Some(delay) = backoff.next_backoff() else {
                    return Err(e);
                };

                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
