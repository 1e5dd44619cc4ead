use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

/// Backoff parameters for [`with_retry`]. The defaults match the external
/// API adapters: three retries, doubling sleeps between 1s and 10s.
#[derive(Debug, Clone, Copy)]
pub struct RetryOptions {
    pub retries: u32,
    pub factor: f64,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retries: 3,
            factor: 2.0,
            min_timeout: Duration::from_millis(1000),
            max_timeout: Duration::from_millis(10_000),
        }
    }
}

/// Errors that signal a misconfiguration or exhausted quota are not worth
/// retrying; everything else (5xx, timeouts, connection resets) is.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    let text = format!("{err:#}");
    const NON_RETRYABLE: &[&str] = &["Payment Required", "402", "Unauthorized", "401", "404"];
    !NON_RETRYABLE.iter().any(|marker| text.contains(marker))
}

fn backoff_delay(opts: &RetryOptions, attempt: u32) -> Duration {
    let base = opts.min_timeout.as_millis() as f64 * opts.factor.powi(attempt as i32 - 1);
    let capped = base.min(opts.max_timeout.as_millis() as f64) as u64;
    Duration::from_millis(capped + fastrand::u64(0..250))
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// Intended for external-API adapters only. Database transactions have
/// their own serialization-retry policy inside the store.
pub async fn with_retry<T, F, Fut>(name: &str, opts: RetryOptions, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt <= opts.retries && is_retryable(&err) => {
                let delay = backoff_delay(&opts, attempt);
                warn!(
                    operation = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
