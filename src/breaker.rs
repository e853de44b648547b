//! Circuit breaker guarding each probe class.
//!
//! Repeated failures open the circuit; while open, calls fail fast with
//! `ConnectivityError::CircuitOpen` instead of hitting the network. After
//! `reset_timeout` elapses the breaker admits exactly one trial call
//! (half-open); a successful trial closes the circuit, a failed one
//! restarts the open timer. Concurrent callers racing the half-open
//! transition are serialized: one gets the trial slot, the rest keep
//! failing fast.

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::ConnectivityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerInner {
    open: bool,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Shared by every concurrent probe of one class. All transitions happen
/// under the mutex; the lock is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

/// Releases the half-open trial slot if the guarded future is dropped
/// before its outcome is recorded. The open timer is left untouched so the
/// next caller can claim the trial immediately.
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock_inner().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                open: false,
                consecutive_failures: 0,
                last_failure_at: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Run `op` under breaker protection.
    ///
    /// Fails fast with `CircuitOpen` while the circuit is open and the
    /// reset timeout has not elapsed, or when another caller already holds
    /// the half-open trial slot. Any error returned by `op` counts toward
    /// the failure threshold.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, ConnectivityError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ConnectivityError>>,
    {
        let is_trial = self.admit()?;
        let mut permit = TrialPermit {
            breaker: self,
            armed: is_trial,
        };

        let result = op().await;
        match &result {
            Ok(_) => self.on_success(is_trial),
            Err(_) => self.on_failure(is_trial),
        }
        permit.armed = false;
        result
    }

    /// Decide whether a call may proceed. Returns `Ok(true)` when the call
    /// is the half-open trial.
    fn admit(&self) -> Result<bool, ConnectivityError> {
        let mut inner = self.lock_inner();
        if !inner.open {
            return Ok(false);
        }
        let timeout_elapsed = inner
            .last_failure_at
            .map_or(true, |t| t.elapsed() >= self.reset_timeout);
        if !timeout_elapsed || inner.trial_in_flight {
            return Err(ConnectivityError::CircuitOpen);
        }
        inner.trial_in_flight = true;
        Ok(true)
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock_inner();
        if trial {
            inner.trial_in_flight = false;
            inner.open = false;
            inner.consecutive_failures = 0;
            debug!("circuit breaker trial succeeded, closing circuit");
        } else if !inner.open {
            inner.consecutive_failures = 0;
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock_inner();
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(Instant::now());
        if trial {
            inner.trial_in_flight = false;
            debug!("circuit breaker trial failed, circuit stays open");
        } else if !inner.open && inner.consecutive_failures >= self.failure_threshold {
            inner.open = true;
            warn!(
                failures = inner.consecutive_failures,
                threshold = self.failure_threshold,
                "circuit breaker opened"
            );
        }
    }

    /// Current state. Half-open is a derived view: the circuit is open and
    /// the reset timeout has elapsed. Pure read, never mutates.
    pub fn state(&self) -> BreakerState {
        let inner = self.lock_inner();
        if !inner.open {
            return BreakerState::Closed;
        }
        match inner.last_failure_at {
            Some(t) if t.elapsed() >= self.reset_timeout => BreakerState::HalfOpen,
            _ => BreakerState::Open,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.lock_inner().consecutive_failures
    }

    pub fn is_open(&self) -> bool {
        self.state() == BreakerState::Open
    }

    /// Manually close the circuit and clear the failure counter.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        inner.open = false;
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
        inner.trial_in_flight = false;
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn probe_error() -> ConnectivityError {
        ConnectivityError::Connection {
            target: "127.0.0.1:1".to_string(),
            reason: "refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let cb = CircuitBreaker::new(2, Duration::from_millis(100));
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(!cb.is_open());
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(2, Duration::from_millis(100));

        let res = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;
        assert!(res.is_err());
        assert_eq!(cb.state(), BreakerState::Closed);

        let res = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;
        assert!(res.is_err());
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_invoking_op() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        let _ = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;
        assert!(cb.is_open());

        let invoked = AtomicBool::new(false);
        let res = cb
            .execute(|| async {
                invoked.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(res, Err(ConnectivityError::CircuitOpen)));
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_trial_success_closes_circuit() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(50));
        let _ = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;
        assert!(cb.is_open());

        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(cb.state(), BreakerState::HalfOpen);

        let res = cb.execute(|| async { Ok(()) }).await;
        assert!(res.is_ok());
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_trial_failure_reopens_circuit() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(50));
        let _ = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;

        tokio::time::sleep(Duration::from_millis(70)).await;

        let res = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;
        assert!(res.is_err());
        assert_eq!(cb.state(), BreakerState::Open);

        // Still rejecting until another reset period passes.
        let res = cb.execute(|| async { Ok(()) }).await;
        assert!(matches!(res, Err(ConnectivityError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_single_trial_while_half_open() {
        let cb = Arc::new(CircuitBreaker::new(1, Duration::from_millis(20)));
        let _ = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        let slow = cb.clone();
        let trial = tokio::spawn(async move {
            slow.execute(|| async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await
        });

        // Give the trial a moment to claim the slot, then race it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let res = cb.execute(|| async { Ok(()) }).await;
        assert!(matches!(res, Err(ConnectivityError::CircuitOpen)));

        trial.await.unwrap().unwrap();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let cb = CircuitBreaker::new(3, Duration::from_millis(100));
        let _ = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;
        let _ = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;
        assert_eq!(cb.failure_count(), 2);

        let _ = cb.execute(|| async { Ok(()) }).await;
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        let _ = cb.execute(|| async { Err::<(), _>(probe_error()) }).await;
        assert!(cb.is_open());

        cb.reset();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.failure_count(), 0);

        let res = cb.execute(|| async { Ok(()) }).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_successes_stay_closed() {
        let cb = Arc::new(CircuitBreaker::new(3, Duration::from_millis(100)));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let cb = cb.clone();
            handles.push(tokio::spawn(async move {
                cb.execute(|| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BreakerState::Closed.to_string(), "closed");
        assert_eq!(BreakerState::Open.to_string(), "open");
        assert_eq!(BreakerState::HalfOpen.to_string(), "half-open");
    }
}
