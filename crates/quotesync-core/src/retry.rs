//! Retry logic with exponential backoff and jitter.
//!
//! [`RetryPolicy::run`] drives one fallible async operation. A caller-supplied
//! classifier decides whether an error is transient (retried) or permanent
//! (returned at once). Backoff sleeps are capped by the backoff maximum and by
//! the remaining [`RetryBudget`] deadline, and end early on cancellation. Past
//! the deadline a symbol still gets all of its retries, spaced by
//! [`SPENT_BUDGET_BACKOFF`].

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff strategy for retrying failed requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Uses an exponential delay between retries.
    ///
    /// The delay after failed attempt `n` is `base * factor^(n-1)`, plus a
    /// random jitter in `[0, base)` when enabled, never exceeding `max`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to add random jitter in `[0, base)`.
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(2),
            factor: 2.0,
            max: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Calculate the delay that follows failed attempt `attempt` (1-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let mut seconds = base.as_secs_f64() * factor.powi(exponent);

                if jitter && !base.is_zero() {
                    seconds += fastrand::f64() * base.as_secs_f64();
                }

                let capped = seconds.min(max.as_secs_f64());
                Duration::try_from_secs_f64(capped).unwrap_or(max)
            }
        }
    }
}

/// Configuration for the automatic retry mechanism.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// The maximum number of retries to attempt.
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// The backoff strategy to use between retries.
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with exponential backoff.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Create a new retry configuration with fixed backoff.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: Backoff::Fixed { delay },
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Calculate the delay for a given retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

/// Backoff used once the cycle deadline has passed.
pub const SPENT_BUDGET_BACKOFF: Duration = Duration::from_millis(250);

/// Time and cancellation limits shared by every retry inside one cycle.
#[derive(Debug, Clone, Default)]
pub struct RetryBudget {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RetryBudget {
    pub fn new(deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// No deadline and a token that is never cancelled.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Terminal outcome of [`RetryPolicy::run`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: E },

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("retry abandoned after {attempts} attempts on cancellation: {last}")]
    Interrupted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Permanent { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Interrupted { attempts, .. } => *attempts,
        }
    }

    pub fn error(&self) -> &E {
        match self {
            Self::Permanent { error, .. } => error,
            Self::Exhausted { last, .. } | Self::Interrupted { last, .. } => last,
        }
    }

    pub fn into_error(self) -> E {
        match self {
            Self::Permanent { error, .. } => error,
            Self::Exhausted { last, .. } | Self::Interrupted { last, .. } => last,
        }
    }

    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent { .. })
    }
}

/// Bounded retry loop around one async operation.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent. The closure receives the 1-based attempt number.
    pub async fn run<T, E, Op, Fut, C>(
        &self,
        mut operation: Op,
        is_transient: C,
        budget: &RetryBudget,
    ) -> Result<T, RetryError<E>>
    where
        Op: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0_u32;

        loop {
            attempt += 1;
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !is_transient(&error) {
                debug!(attempt, %error, "permanent failure, not retrying");
                return Err(RetryError::Permanent {
                    attempts: attempt,
                    error,
                });
            }

            if attempt > self.config.max_retries {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let mut delay = self.config.delay_for_attempt(attempt);
            if let Some(remaining) = budget.remaining() {
                delay = delay.min(remaining.max(SPENT_BUDGET_BACKOFF));
            }

            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "transient failure, backing off"
            );

            tokio::select! {
                biased;
                _ = budget.cancel.cancelled() => {
                    return Err(RetryError::Interrupted {
                        attempts: attempt,
                        last: error,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
