//! Pluggable retry strategies and the retry loop that drives them.
//!
//! The channel manager wraps connect and subscribe in [`retry_with_strategy`].
//! Production code uses [`FixedSchedule`] for connecting and
//! [`ExponentialBackoff`] for subscribing; tests swap in [`ImmediateRetry`].

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::BackoffPolicy;
use crate::ConnectSchedule;
use crate::Error;
use crate::NetworkError;
use crate::Result;

/// Decides how long to wait after a failed attempt.
pub trait RetryStrategy: Send + Sync + 'static {
    /// Delay before the next attempt, given the number of failed attempts so
    /// far (starting at 1). `None` stops retrying.
    fn next_delay(
        &self,
        failures: u32,
    ) -> Option<Duration>;

    /// Deadline applied to each individual attempt.
    fn attempt_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Walks a fixed list of delays, repeating the last one.
#[derive(Debug, Clone)]
pub struct FixedSchedule {
    delays: Vec<Duration>,
    max_attempts: u32,
}

impl FixedSchedule {
    pub fn new(
        delays: Vec<Duration>,
        max_attempts: u32,
    ) -> Self {
        Self {
            delays,
            max_attempts,
        }
    }
}

impl From<&ConnectSchedule> for FixedSchedule {
    fn from(schedule: &ConnectSchedule) -> Self {
        Self::new(
            schedule.delays_ms.iter().copied().map(Duration::from_millis).collect(),
            schedule.max_attempts,
        )
    }
}

impl RetryStrategy for FixedSchedule {
    fn next_delay(
        &self,
        failures: u32,
    ) -> Option<Duration> {
        if self.max_attempts != 0 && failures >= self.max_attempts {
            return None;
        }
        let idx = (failures.saturating_sub(1) as usize).min(self.delays.len().saturating_sub(1));
        Some(self.delays.get(idx).copied().unwrap_or_default())
    }
}

/// Doubling backoff capped at `max_delay`, with a per-attempt timeout.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_retries: usize,
    attempt_timeout: Duration,
}

impl From<&BackoffPolicy> for ExponentialBackoff {
    fn from(policy: &BackoffPolicy) -> Self {
        Self {
            base_delay: Duration::from_millis(policy.base_delay_ms),
            max_delay: Duration::from_millis(policy.max_delay_ms),
            max_retries: policy.max_retries,
            attempt_timeout: Duration::from_millis(policy.timeout_ms),
        }
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(
        &self,
        failures: u32,
    ) -> Option<Duration> {
        if self.max_retries != 0 && failures as usize >= self.max_retries {
            return None;
        }
        let shift = failures.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        Some(delay.min(self.max_delay))
    }

    fn attempt_timeout(&self) -> Option<Duration> {
        Some(self.attempt_timeout)
    }
}

/// Zero-delay retries, optionally bounded.
#[derive(Debug, Clone, Default)]
pub struct ImmediateRetry {
    pub max_attempts: Option<u32>,
}

impl ImmediateRetry {
    pub fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }
}

impl RetryStrategy for ImmediateRetry {
    fn next_delay(
        &self,
        failures: u32,
    ) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if failures >= max => None,
            _ => Some(Duration::ZERO),
        }
    }
}

/// Runs `task` until it succeeds, fails permanently, the strategy gives up,
/// or `cancel` fires.
///
/// Permanent errors (see [`Error::is_permanent`]) are returned on the first
/// occurrence.
pub async fn retry_with_strategy<F, Fut, T>(
    op: &'static str,
    strategy: &dyn RetryStrategy,
    cancel: &CancellationToken,
    mut task: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(NetworkError::Cancelled.into());
        }

        let attempt = async {
            match strategy.attempt_timeout() {
                Some(deadline) => match timeout(deadline, task()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::from(NetworkError::RetryTimeoutError(deadline))),
                },
                None => task().await,
            }
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(NetworkError::Cancelled.into()),
            outcome = attempt => outcome,
        };

        let error = match outcome {
            Ok(value) => {
                if failures > 0 {
                    debug!(op, failures, "succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if e.is_permanent() => return Err(e),
            Err(e) => e,
        };

        failures = failures.saturating_add(1);
        let Some(delay) = strategy.next_delay(failures) else {
            warn!(op, attempts = failures, "giving up: {:?}", error);
            return Err(NetworkError::RetryExhausted {
                op,
                attempts: failures,
            }
            .into());
        };
        warn!(op, attempt = failures, ?delay, "attempt failed: {:?}", error);

        tokio::select! {
            _ = cancel.cancelled() => return Err(NetworkError::Cancelled.into()),
            _ = sleep(delay) => {}
        }
    }
}
