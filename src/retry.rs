//! Bounded retry with deterministic exponential backoff
//!
//! Every network-touching operation on [`MailClient`](crate::MailClient)
//! runs through [`retry`]. Each attempt gets a fresh connection, so a
//! failed attempt never leaves shared state behind.

use crate::error::{Error, Result};
use std::future::Future;
use std::iter;
use std::time::Duration;
use tracing::{debug, warn};

/// How often and how patiently an operation is retried.
///
/// Invariants (enforced by [`RetryPolicy::new`]): at least one attempt,
/// and `initial_interval <= max_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    max_interval: Duration,
    retry_auth: bool,
}

impl RetryPolicy {
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero attempts or an initial
    /// interval above the maximum.
    pub fn new(max_attempts: u32, initial_interval: Duration, max_interval: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if initial_interval > max_interval {
            return Err(Error::Config(format!(
                "initial interval {initial_interval:?} exceeds max interval {max_interval:?}"
            )));
        }
        Ok(Self {
            max_attempts,
            initial_interval,
            max_interval,
            retry_auth: false,
        })
    }

    /// Run the operation exactly once.
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            retry_auth: false,
        }
    }

    /// Also retry credential rejections. Off by default: a wrong
    /// password does not fix itself between attempts.
    #[must_use]
    pub const fn with_auth_retry(mut self, retry_auth: bool) -> Self {
        self.retry_auth = retry_auth;
        self
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    #[must_use]
    pub const fn max_interval(&self) -> Duration {
        self.max_interval
    }

    /// The sleeps between attempts, in order.
    ///
    /// Yields `max_attempts - 1` values: the first is
    /// `initial_interval`, each following one doubles, capped at
    /// `max_interval`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let max = self.max_interval;
        iter::successors(Some(self.initial_interval), move |prev| {
            Some(prev.saturating_mul(2).min(max))
        })
        .take(self.max_attempts.saturating_sub(1) as usize)
    }

    fn should_retry(&self, err: &Error) -> bool {
        match err {
            Error::Auth(_) => self.retry_auth,
            other => other.is_retryable(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            retry_auth: false,
        }
    }
}

/// Run `op` until it succeeds or the policy gives up.
///
/// `operation` and `target` only feed the log lines. Errors the policy
/// does not retry are returned as-is after the failing attempt; once
/// all attempts fail the last error is wrapped in
/// [`Error::RetryExhausted`].
///
/// # Errors
///
/// Returns the non-retryable error, or the exhausted last attempt.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, target: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delays = policy.delays();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, target, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !policy.should_retry(&err) {
            warn!(operation, target, attempt, error = %err, "Giving up on non-retryable error");
            return Err(err);
        }

        let Some(delay) = delays.next() else {
            warn!(operation, target, attempt, error = %err, "Final attempt failed");
            return Err(Error::RetryExhausted {
                attempts: attempt,
                source: Box::new(err),
            });
        };

        warn!(
            operation,
            target,
            attempt,
            max_attempts = policy.max_attempts,
            retry_in = ?delay,
            error = %err,
            "Attempt failed"
        );
        tokio::time::sleep(delay).await;
    }
}
