//! Convergence polling
//!
//! Fixed-interval polling shared by every resource that must wait for the
//! remote service to reach a state. Cancellation is checked before each poll
//! and raced against each sleep.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed back-off polling budget
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between polls
    pub interval: Duration,
    /// Maximum number of polls
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 60,
        }
    }
}

impl PollConfig {
    /// At least one poll is always made
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Total wait the budget allows, saturating at `Duration::MAX`
    pub fn budget(&self) -> Duration {
        self.interval
            .checked_mul(self.max_attempts)
            .unwrap_or(Duration::MAX)
    }
}

/// How a polling run ended
#[derive(Debug)]
pub enum PollOutcome<T> {
    /// The success predicate matched
    Ready { value: T, attempts: u32 },
    /// The terminal-failure predicate matched; polling stopped early
    Terminal { value: T, attempts: u32 },
    /// The final attempt failed with an error
    Failed { error: Error, attempts: u32 },
    /// Every attempt completed without reaching either predicate
    Exhausted { last: Option<T>, attempts: u32 },
}

/// Sleep for `duration` unless cancelled first
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Poll until `is_ready` or `is_terminal` holds, or the budget runs out
///
/// Errors from `poll` are retried until the final attempt. Only cancellation
/// is returned as `Err`; every other ending is a [`PollOutcome`].
pub async fn poll_until<T, F, Fut, R, X>(
    config: &PollConfig,
    cancel: &CancellationToken,
    mut poll: F,
    is_ready: R,
    is_terminal: X,
) -> Result<PollOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&T) -> bool,
    X: Fn(&T) -> bool,
{
    let mut last = None;

    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match poll().await {
            Ok(value) if is_ready(&value) => {
                return Ok(PollOutcome::Ready {
                    value,
                    attempts: attempt,
                })
            },
            Ok(value) if is_terminal(&value) => {
                return Ok(PollOutcome::Terminal {
                    value,
                    attempts: attempt,
                })
            },
            Ok(value) => {
                last = Some(value);
            },
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(error) if attempt == config.max_attempts => {
                return Ok(PollOutcome::Failed {
                    error,
                    attempts: attempt,
                });
            },
            Err(error) => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    error = %error,
                    "Poll failed, retrying"
                );
            },
        }

        if attempt < config.max_attempts {
            sleep_or_cancel(config.interval, cancel).await?;
        }
    }

    Ok(PollOutcome::Exhausted {
        last,
        attempts: config.max_attempts,
    })
}
