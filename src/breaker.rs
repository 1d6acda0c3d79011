//! Circuit breaker guarding the proxy record store
//!
//! All store calls from the resilience layer go through [`CircuitBreaker::call`].
//! Only transient infrastructure failures count toward the threshold;
//! validation errors pass through without affecting the breaker.

use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::{Result, TrawlError};

/// Externally visible breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observability snapshot for stats endpoints
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

enum State {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { probe_in_flight: bool },
}

enum Permit {
    Normal,
    Probe,
}

/// Three-state circuit breaker with a single-probe half-open phase
///
/// Transitions are made under one mutex so they are atomic across concurrent
/// callers; at most one probe is admitted while half-open, and every other
/// caller in that window is rejected as if the breaker were still open.
pub struct CircuitBreaker {
    state: Mutex<State>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            state: Mutex::new(State::Closed { failures: 0 }),
            failure_threshold: config.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(config.recovery_timeout),
        }
    }

    /// Run a store operation under the breaker.
    ///
    /// While open, the future is never polled: the call fails fast with
    /// [`TrawlError::BreakerOpen`].
    pub async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let permit = self.acquire()?;

        // If the probe future is dropped mid-flight (caller cancelled), the
        // guard re-opens the breaker so the half-open slot is not lost.
        let guard = match permit {
            Permit::Probe => Some(ProbeGuard::new(self)),
            Permit::Normal => None,
        };

        let result = fut.await;

        if let Some(guard) = guard {
            guard.defuse();
        }

        match &result {
            Ok(_) => self.on_success(),
            Err(e) if e.is_transient() => self.on_failure(),
            // The store answered; a rejected input is not an infrastructure
            // failure.
            Err(_) => self.on_success(),
        }

        result
    }

    /// Current state (rechecks the open timer so callers see half_open once
    /// the recovery timeout has elapsed)
    pub fn state(&self) -> BreakerState {
        match &*self.state.lock() {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.recovery_timeout {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock();
        let (state, consecutive_failures) = match &*state {
            State::Closed { failures } => (BreakerState::Closed, *failures),
            State::Open { .. } => (BreakerState::Open, self.failure_threshold),
            State::HalfOpen { .. } => (BreakerState::HalfOpen, self.failure_threshold),
        };
        BreakerSnapshot {
            state,
            consecutive_failures,
        }
    }

    fn acquire(&self) -> Result<Permit> {
        let mut state = self.state.lock();
        let recovery_elapsed = match &*state {
            State::Closed { .. } => return Ok(Permit::Normal),
            State::Open { opened_at } => opened_at.elapsed() >= self.recovery_timeout,
            State::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    return Err(TrawlError::BreakerOpen);
                }
                *state = State::HalfOpen {
                    probe_in_flight: true,
                };
                return Ok(Permit::Probe);
            }
        };

        if recovery_elapsed {
            *state = State::HalfOpen {
                probe_in_flight: true,
            };
            info!("Circuit breaker half-open, admitting trial call");
            Ok(Permit::Probe)
        } else {
            Err(TrawlError::BreakerOpen)
        }
    }

    fn on_success(&self) {
        let mut state = self.state.lock();
        let close = match &*state {
            State::HalfOpen { .. } => {
                info!("Circuit breaker trial call succeeded, closing");
                true
            }
            State::Closed { failures } => *failures > 0,
            State::Open { .. } => false,
        };
        if close {
            *state = State::Closed { failures: 0 };
        }
    }

    fn on_failure(&self) {
        let mut state = self.state.lock();
        let open = match &mut *state {
            State::Closed { failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    warn!(
                        failures = *failures,
                        "Circuit breaker opened after consecutive store failures"
                    );
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { .. } => {
                warn!("Circuit breaker trial call failed, reopening");
                true
            }
            State::Open { .. } => false,
        };
        if open {
            *state = State::Open {
                opened_at: Instant::now(),
            };
        }
    }

    fn reopen_after_lost_probe(&self) {
        let mut state = self.state.lock();
        if let State::HalfOpen { .. } = &*state {
            warn!("Circuit breaker trial call dropped, reopening");
            *state = State::Open {
                opened_at: Instant::now(),
            };
        }
    }
}

struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl<'a> ProbeGuard<'a> {
    fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            armed: true,
        }
    }

    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.reopen_after_lost_probe();
        }
    }
}

/// Shared breaker handle
pub type SharedBreaker = Arc<CircuitBreaker>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, recovery_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(&BreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: recovery_secs,
        })
    }

    fn transient() -> TrawlError {
        TrawlError::DatabaseConnection("refused".into())
    }

    #[tokio::test]
    async fn test_closed_passes_calls_through() {
        let breaker = breaker(5, 60);

        let result = breaker.call(async { Ok::<_, TrawlError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = breaker(5, 60);

        for _ in 0..5 {
            let _ = breaker
                .call(async { Err::<(), _>(transient()) })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        // While open, the store is never invoked.
        let calls = AtomicU32::new(0);
        let result = breaker
            .call(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TrawlError>(())
            })
            .await;
        assert!(matches!(result, Err(TrawlError::BreakerOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_failures() {
        let breaker = breaker(5, 60);

        for _ in 0..4 {
            let _ = breaker
                .call(async { Err::<(), _>(transient()) })
                .await;
        }
        breaker.call(async { Ok::<_, TrawlError>(()) }).await.unwrap();

        // Four more failures should not open it; the counter was reset.
        for _ in 0..4 {
            let _ = breaker
                .call(async { Err::<(), _>(transient()) })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_success_closes() {
        let breaker = breaker(5, 60);

        for _ in 0..5 {
            let _ = breaker
                .call(async { Err::<(), _>(transient()) })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(61)).await;

        // The next call is the trial call and it reaches the store.
        let result = breaker.call(async { Ok::<_, TrawlError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_failure_reopens() {
        let breaker = breaker(5, 60);

        for _ in 0..5 {
            let _ = breaker
                .call(async { Err::<(), _>(transient()) })
                .await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        let _ = breaker
            .call(async { Err::<(), _>(transient()) })
            .await;
        assert_eq!(breaker.state(), BreakerState::Open);

        // Timer restarted from the failed probe.
        tokio::time::advance(Duration::from_secs(30)).await;
        let result = breaker.call(async { Ok::<_, TrawlError>(()) }).await;
        assert!(matches!(result, Err(TrawlError::BreakerOpen)));

        tokio::time::advance(Duration::from_secs(31)).await;
        breaker.call(async { Ok::<_, TrawlError>(()) }).await.unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_probe() {
        let breaker = Arc::new(breaker(1, 60));

        let _ = breaker
            .call(async { Err::<(), _>(transient()) })
            .await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let probe_breaker = breaker.clone();
        let probe = tokio::spawn(async move {
            probe_breaker
                .call(async {
                    release_rx.await.ok();
                    Ok::<_, TrawlError>(())
                })
                .await
        });

        // Let the probe task acquire the half-open slot.
        tokio::task::yield_now().await;

        // A second caller during the probe window is rejected as if open.
        let result = breaker.call(async { Ok::<_, TrawlError>(()) }).await;
        assert!(matches!(result, Err(TrawlError::BreakerOpen)));

        release_tx.send(()).unwrap();
        probe.await.unwrap().unwrap();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_errors_do_not_trip_breaker() {
        let breaker = breaker(2, 60);

        for _ in 0..10 {
            let _ = breaker
                .call(async { Err::<(), _>(TrawlError::Validation("bad input".into())) })
                .await;
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
