//! Retry-until-ready polling with a timeout and cooperative cancellation.
//!
//! Provisioning waits on several conditions that only become true after an
//! unknown delay: a network attachment appearing, a workload reaching its
//! running state, a freshly launched server answering console queries. Each
//! of those is expressed as a condition that fails until the awaited state is
//! reached, and [`wait_until`] drives it.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised by [`wait_until`].
#[derive(Debug, Error)]
pub enum WaitError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the cancellation token fired before the condition held.
    #[error("operation cancelled")]
    Cancelled,
    /// Raised when the condition kept failing for longer than the timeout.
    #[error("timed out after {timeout:?}: {last}")]
    Timeout {
        /// Configured timeout.
        timeout: Duration,
        /// Error returned by the final attempt.
        #[source]
        last: E,
    },
}

/// Tuning for a single [`wait_until`] call.
#[derive(Clone, Debug)]
pub struct PollOptions {
    interval: Duration,
    timeout: Duration,
    cancellation: Option<CancellationToken>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            cancellation: None,
        }
    }
}

impl PollOptions {
    /// Creates options with the given interval and timeout and no token.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            cancellation: None,
        }
    }

    /// Binds the wait to a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Delay between attempts.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Total time budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    async fn pause(&self) {
        let Some(token) = &self.cancellation else {
            sleep(self.interval).await;
            return;
        };
        tokio::select! {
            () = token.cancelled() => {}
            () = sleep(self.interval) => {}
        }
    }
}

/// Invokes `condition` until it succeeds, the timeout elapses, or the token
/// is cancelled.
///
/// The token is checked before every attempt, so a token that is already
/// cancelled fails the call without invoking `condition` at all. There is no
/// attempt limit other than the timeout.
///
/// # Errors
///
/// Returns [`WaitError::Cancelled`] when the token fires and
/// [`WaitError::Timeout`] (embedding the last failure) when the condition
/// keeps failing past the timeout.
pub async fn wait_until<T, E, F, Fut>(
    mut condition: F,
    options: &PollOptions,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + 'static,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        if options.is_cancelled() {
            return Err(WaitError::Cancelled);
        }

        attempt = attempt.saturating_add(1);
        match condition().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if started.elapsed() >= options.timeout {
                    return Err(WaitError::Timeout {
                        timeout: options.timeout,
                        last: err,
                    });
                }
                debug!(attempt, error = %err, "condition not met yet; retrying");
                options.pause().await;
            }
        }
    }
}
