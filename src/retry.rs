//! Retry logic with exponential backoff
//!
//! Catalog calls are short request/response exchanges that fail transiently (timeouts,
//! resets). This module retries them with exponential backoff and optional jitter before
//! the refresher gives up and records a data-refresh failure on the item.
//!
//! # Example
//!
//! ```no_run
//! use vod_dl::retry::{IsRetryable, retry_with_backoff};
//! use vod_dl::config::RetryConfig;
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
//! retry_with_backoff(&config, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{CatalogError, Error};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Catalog(e) => e.is_retryable(),
            Error::ExternalTool(msg) => {
                msg.contains("timeout") || msg.contains("busy") || msg.contains("temporary")
            }
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Process(_)
            | Error::Serialization(_)
            | Error::NotFound(_)
            | Error::AlreadyQueued(_)
            | Error::ShuttingDown
            | Error::DispatchWaitTimeout { .. }
            | Error::NotSupported(_)
            | Error::Other(_) => false,
        }
    }
}

impl IsRetryable for CatalogError {
    fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Unavailable(_))
    }
}

/// Delay schedule for one retried operation
///
/// Delays start at `initial_delay`, grow by `backoff_multiplier` and are capped at
/// `max_delay`. With jitter each delay is stretched by up to a factor of two.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
    remaining: u32,
}

impl Backoff {
    /// Schedule for `config.max_attempts` retries
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay,
            max: config.max_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            remaining: config.max_attempts,
        }
    }

    /// Delay before the next retry, `None` once every retry is used
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let base = self.next;
        self.next = Duration::from_secs_f64(base.as_secs_f64() * self.multiplier).min(self.max);
        Some(if self.jitter { add_jitter(base) } else { base })
    }
}

/// Run a catalog operation, retrying transient failures on the [`Backoff`] schedule
///
/// # Arguments
///
/// * `config` - Retry configuration (max attempts, delays, backoff multiplier, jitter)
/// * `operation` - Async closure that returns Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// The first success, the first permanent error, or the last transient error once the
/// retries are used up.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);
    let mut attempts: u32 = 1;

    loop {
        let error = match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    tracing::info!(attempts, "Catalog request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            tracing::debug!(error = %error, "Catalog request failed permanently");
            return Err(error);
        }
        let Some(delay) = backoff.next_delay() else {
            tracing::warn!(error = %error, attempts, "Catalog request failed, retries exhausted");
            return Err(error);
        };

        tracing::warn!(
            error = %error,
            attempt = attempts,
            max_attempts = config.max_attempts,
            delay_ms = delay.as_millis(),
            "Catalog request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempts += 1;
    }
}

/// Stretch a delay to somewhere between `delay` and `2 * delay`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    delay.mul_f64(1.0 + factor)
}
