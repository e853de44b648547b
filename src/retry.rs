//! Bounded exponential-backoff retry executor.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::ConnectivityError;

/// Retry behavior for a single probe operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

/// Resolve when the stop signal flips to true. If the sender is gone the
/// signal can never fire, so the future stays pending.
pub(crate) async fn stopped(stop_rx: &watch::Receiver<bool>) {
    let mut rx = stop_rx.clone();
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Execute `op` with exponential backoff between failed attempts.
///
/// The first attempt runs immediately; each subsequent attempt waits
/// `base_delay * multiplier^n`, capped at `max_delay`. Both the backoff
/// sleep and the attempt itself are interrupted by the stop signal
/// (`Cancelled`) and by `deadline` (`DeadlineExceeded`).
///
/// Returns the number of retries consumed alongside the outcome: 0 when
/// the first attempt succeeds, `max_attempts` when the budget is
/// exhausted, in which case the last observed error is returned.
pub async fn execute_with_retry<F, Fut>(
    config: &RetryConfig,
    stop_rx: &watch::Receiver<bool>,
    deadline: Instant,
    mut op: F,
) -> (u32, Result<(), ConnectivityError>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ConnectivityError>>,
{
    let mut delay = config.base_delay;
    let mut last_err = None;

    for attempt in 0..config.max_attempts {
        if *stop_rx.borrow() {
            return (attempt, Err(ConnectivityError::Cancelled));
        }

        if attempt > 0 {
            let wake = Instant::now() + delay;
            tokio::select! {
                biased;
                _ = stopped(stop_rx) => {
                    return (attempt, Err(ConnectivityError::Cancelled));
                }
                _ = sleep_until(deadline), if deadline < wake => {
                    return (attempt, Err(ConnectivityError::DeadlineExceeded));
                }
                _ = sleep_until(wake) => {}
            }

            delay = Duration::from_secs_f64(delay.as_secs_f64() * config.multiplier);
            if delay > config.max_delay {
                delay = config.max_delay;
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = stopped(stop_rx) => {
                return (attempt, Err(ConnectivityError::Cancelled));
            }
            res = op() => res,
        };

        match outcome {
            Ok(()) => return (attempt, Ok(())),
            Err(err) => {
                debug!(
                    attempt = attempt + 1,
                    max_attempts = config.max_attempts,
                    error = %err,
                    "operation failed, retrying"
                );
                last_err = Some(err);
            }
        }
    }

    (config.max_attempts, last_err.map_or(Ok(()), Err))
}
