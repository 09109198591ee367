//! Bounded retry.
//!
//! An operation is retried with a caller-supplied backoff until it succeeds or
//! the overall timeout elapses, whichever comes first. The timeout covers the
//! attempts and the sleeps between them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fleetsync_core::Error;

type Backoff = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Backoff schedule plus overall timeout.
#[derive(Clone)]
pub struct RetryPolicy {
    backoff: Backoff,
    timeout: Duration,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// How a retry run ended without success.
#[derive(Debug)]
pub struct RetryExhausted {
    /// Attempts made.
    pub attempts: u32,
    /// Error of the last attempt, `None` if the first attempt never finished.
    pub last_error: Option<Error>,
}

impl RetryPolicy {
    /// Uses `backoff(attempt)` as the delay after the numbered failed
    /// attempt, starting at 1.
    pub fn new(timeout: Duration, backoff: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            backoff: Arc::new(backoff),
            timeout,
        }
    }

    /// Doubles the delay from `base` up to `max`.
    #[must_use]
    pub fn exponential(base: Duration, max: Duration, timeout: Duration) -> Self {
        Self::new(timeout, move |attempt| {
            let factor = 1_u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
            base.saturating_mul(factor).min(max)
        })
    }

    /// Waits `delay` between attempts.
    #[must_use]
    pub fn fixed(delay: Duration, timeout: Duration) -> Self {
        Self::new(timeout, move |_| delay)
    }

    /// Returns the overall timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the delay after failed attempt `attempt`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        (self.backoff)(attempt)
    }

    /// Runs `op` until it succeeds or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] with the last error once the timeout
    /// elapses.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempts = 0_u32;
        let mut last_error = None;

        let attempt_loop = async {
            loop {
                attempts += 1;
                match op().await {
                    Ok(value) => return value,
                    Err(e) => {
                        tracing::debug!(attempt = attempts, error = %e, "attempt failed");
                        last_error = Some(e);
                        tokio::time::sleep(self.delay(attempts)).await;
                    }
                }
            }
        };
        let outcome = tokio::time::timeout(self.timeout, attempt_loop).await;

        outcome.map_err(|_| RetryExhausted {
            attempts,
            last_error,
        })
    }
}
