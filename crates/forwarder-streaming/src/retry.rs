//! Bounded retry with exponential backoff for collaborator calls

use forwarder_core::{CollaboratorError, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Backoff before the retry following attempt number `attempt` (1-based)
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let delay_ms = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(exponent);
    Duration::from_millis(delay_ms.min(config.max_backoff_ms as f64) as u64)
}

/// Run `operation` until it succeeds or `config.max_attempts` attempts failed.
/// The last error is returned.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    mut call: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let delay = backoff_delay(config, attempt);
                warn!(
                    attempt,
                    max_attempts,
                    "{} failed, retrying in {:?}: {}",
                    operation,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
