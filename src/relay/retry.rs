//! Exponential backoff retry for relay attempts.
//!
//! Only transport-level failures (connection refused, timeouts, resets) are
//! retried. A response from the internal node, even an error status, is an
//! answer and ends the loop immediately.

use std::future::Future;
use std::time::Duration;

use super::error::RelayError;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Maximum delay between retries (cap for exponential growth).
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (typically 2.0).
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Cap applied to the delay between relay attempts.
    ///
    /// GitHub gives up on a delivery after 10 seconds, so long sleeps here
    /// only turn a 502 into a GitHub-side timeout.
    pub const MAX_DELAY: Duration = Duration::from_secs(4);

    /// Creates a new retry configuration.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Creates a doubling backoff with the given retry count and first delay.
    pub fn doubling(max_retries: u32, initial_delay: Duration) -> Self {
        Self::new(max_retries, initial_delay, Self::MAX_DELAY, 2.0)
    }

    /// Computes the delay for the given retry attempt (0-indexed).
    ///
    /// The delay grows exponentially: `initial_delay * backoff_multiplier^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped_secs)
    }

    /// Returns an iterator over all retry delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }

    /// Total number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Outcome of [`retry_with_backoff`].
#[derive(Debug)]
pub enum RetryResult<T> {
    /// The operation succeeded.
    Success {
        value: T,
        /// Number of attempts made (including the successful one).
        attempts: u32,
    },

    /// Every attempt failed with a transient error.
    ExhaustedRetries {
        /// The last error encountered.
        last_error: RelayError,
        /// Number of attempts made (including the initial attempt).
        attempts: u32,
    },

    /// A non-retriable error occurred.
    PermanentError {
        error: RelayError,
        attempts: u32,
    },
}

impl<T> RetryResult<T> {
    /// Converts to a Result, treating exhausted retries and permanent errors as Err.
    pub fn into_result(self) -> Result<T, RelayError> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::PermanentError { error, .. } => Err(error),
        }
    }

    /// Number of attempts that were made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. }
            | RetryResult::ExhaustedRetries { attempts, .. }
            | RetryResult::PermanentError { attempts, .. } => *attempts,
        }
    }
}

/// Executes an async operation with retry logic.
///
/// The operation is retried according to `config` while it returns a
/// transient error (see [`RelayError::is_transient`]). Anything else is
/// returned immediately.
///
/// # Arguments
///
/// * `config` - Retry configuration (delays, max attempts)
/// * `operation` - The async operation to execute. Called repeatedly until
///   success, permanent error, or max retries exhausted. Receives the
///   1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(config: RetryConfig, mut operation: F) -> RetryResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RelayError>>,
{
    let max_attempts = config.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => {
                return RetryResult::Success {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) if !e.is_transient() => {
                return RetryResult::PermanentError {
                    error: e,
                    attempts: attempt,
                };
            }
            Err(e) => {
                if attempt >= max_attempts {
                    return RetryResult::ExhaustedRetries {
                        last_error: e,
                        attempts: attempt,
                    };
                }

                let delay = config.delay_for_attempt(attempt - 1);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
