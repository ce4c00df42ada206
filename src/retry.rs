//! Retry logic with exponential backoff
//!
//! Transient fetch failures (timeouts, refused connections, 5xx) are retried a
//! bounded number of times before the coordinator classifies them. A 404 is never
//! retried: it is the expected answer for artifacts that were unlisted upstream.
//!
//! # Example
//!
//! ```no_run
//! use registry_mirror::retry::{IsRetryable, fetch_with_retry};
//! use registry_mirror::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! fetch_with_retry(&config, "https://example.test/a.nupkg", || async {
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // Absent upstream; asking again will not change the answer
            FetchError::NotFound => false,
            // Server busy or overloaded
            FetchError::Status { status } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            FetchError::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            // Local disk problems need operator attention
            FetchError::Io(_) => false,
            FetchError::Other(_) => false,
        }
    }
}

/// Fetch `url` with `operation`, retrying transient failures
///
/// The operation runs at most `1 + config.max_attempts` times. Between attempts
/// the task sleeps for [`backoff_delay`] (plus jitter when enabled). Errors that
/// are not [`IsRetryable`] end the loop immediately; otherwise the last error is
/// returned once the attempts are used up.
pub async fn fetch_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    url: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0u32;
    loop {
        let err = match operation().await {
            Ok(value) => {
                if retries > 0 {
                    tracing::info!(url, retries, "Fetch recovered after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if retries >= config.max_attempts {
            tracing::debug!(url, retries, error = %err, "Giving up on transient failure");
            return Err(err);
        }

        let mut delay = backoff_delay(config, retries);
        if config.jitter {
            delay = add_jitter(delay);
        }
        retries += 1;
        tracing::debug!(
            url,
            retry = retries,
            of = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient fetch failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Delay before retry number `retry` (0-based), without jitter
///
/// `initial_delay * backoff_multiplier^retry`, capped at `max_delay`.
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let factor = config.backoff_multiplier.max(1.0).powi(retry as i32);
    let secs = config.initial_delay.as_secs_f64() * factor;
    if !secs.is_finite() || secs >= config.max_delay.as_secs_f64() {
        return config.max_delay;
    }
    Duration::from_secs_f64(secs)
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
