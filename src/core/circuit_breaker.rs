//! Consecutive-failure circuit breaker shared by all in-flight requests.
//!
//! # States
//!
//! - **Closed**: normal operation, attempts pass through and failures are counted.
//! - **Open**: attempts are rejected without network I/O until the open period elapses.
//! - **Half-open**: exactly one trial attempt is admitted. Its success closes the
//!   circuit, its failure opens it again for a fresh open period.
//!
//! The open period is tracked as a deadline (`opened_at + open_duration`) and the
//! Open -> HalfOpen transition is applied under the same lock as every outcome update,
//! so a late timer can never race with a concurrent `on_failure` / `on_success`.
use std::{
    fmt,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{config::CircuitBreakerConfig, metrics::set_circuit_state};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerInner {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
            trial_in_flight: false,
        }
    }
}

pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        set_circuit_state(CircuitState::Closed);
        Self {
            inner: Mutex::new(BreakerInner::closed()),
            failure_threshold: config.failure_threshold.max(1),
            open_duration: config.open_duration(),
        }
    }

    /// Lock the state and apply a due Open -> HalfOpen transition.
    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = false;
                    tracing::info!("Circuit breaker is now HALF-OPEN, admitting one trial request");
                    set_circuit_state(CircuitState::HalfOpen);
                }
            }
        }
        inner
    }

    fn open(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_in_flight = false;
        set_circuit_state(CircuitState::Open);
    }

    /// Current state, with any due transition applied.
    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Time elapsed since the most recent recorded failure.
    pub fn time_since_last_failure(&self) -> Option<Duration> {
        self.lock().last_failure_at.map(|at| at.elapsed())
    }

    /// Remaining open period, if the circuit is open.
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.lock();
        match (inner.state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                Some(self.open_duration.saturating_sub(opened_at.elapsed()))
            }
            _ => None,
        }
    }

    /// Whether a new attempt may be made right now.
    ///
    /// In the half-open state the first caller takes the single trial slot and every
    /// other caller is refused until that trial reports back through [`on_success`],
    /// [`on_failure`] or [`release_trial`].
    ///
    /// [`on_success`]: Self::on_success
    /// [`on_failure`]: Self::on_failure
    /// [`release_trial`]: Self::release_trial
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Admit an attempt, returning a permit that reports the outcome.
    ///
    /// On refusal returns the remaining open period when known.
    pub fn acquire(&self) -> Result<BreakerPermit<'_>, Option<Duration>> {
        let (admitted, trial) = {
            let mut inner = self.lock();
            let state = inner.state;
            match state {
                CircuitState::Closed => (true, false),
                CircuitState::Open => (false, false),
                CircuitState::HalfOpen if inner.trial_in_flight => (false, false),
                CircuitState::HalfOpen => {
                    inner.trial_in_flight = true;
                    (true, true)
                }
            }
        };

        if admitted {
            Ok(BreakerPermit {
                breaker: self,
                trial,
                settled: false,
            })
        } else {
            Err(self.retry_after())
        }
    }

    /// Record a successful attempt made after [`allow_request`](Self::allow_request).
    pub fn on_success(&self) {
        self.record_success(true);
    }

    /// Record a failed attempt made after [`allow_request`](Self::allow_request).
    pub fn on_failure(&self) {
        self.record_failure(true);
    }

    fn record_success(&self, trial: bool) {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if trial => {
                *inner = BreakerInner::closed();
                tracing::info!("Circuit breaker is now CLOSED after a successful trial request");
                set_circuit_state(CircuitState::Closed);
            }
            CircuitState::HalfOpen => {
                // Admitted before the circuit opened; only the trial decides.
                tracing::debug!("Ignoring late success while circuit is half-open");
            }
            CircuitState::Open => {
                // A request admitted before the circuit opened; the open period stands.
                tracing::debug!("Ignoring late success while circuit is open");
            }
        }
    }

    fn record_failure(&self, trial: bool) {
        let mut inner = self.lock();
        let state = inner.state;
        if state == CircuitState::HalfOpen && !trial {
            tracing::debug!("Ignoring late failure while circuit is half-open");
            return;
        }

        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());

        match state {
            CircuitState::HalfOpen => {
                self.open(&mut inner);
                tracing::warn!(
                    "Circuit breaker trial request failed, OPEN again for {:?}",
                    self.open_duration
                );
            }
            CircuitState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                self.open(&mut inner);
                tracing::warn!(
                    "Circuit breaker is now OPEN (after {} consecutive failures), rejecting requests for {:?}",
                    inner.consecutive_failures,
                    self.open_duration
                );
            }
            CircuitState::Open => {
                // Re-arm the open period for failures that land while open.
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                tracing::debug!(
                    "Upstream failure recorded ({}/{})",
                    inner.consecutive_failures,
                    self.failure_threshold
                );
            }
        }
    }

    /// Give back a half-open trial slot without recording an outcome (cancelled attempt).
    pub fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    /// Operator reset: closed, counters zeroed, pending transition discarded.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = BreakerInner::closed();
        tracing::info!("Circuit breaker manually reset to CLOSED");
        set_circuit_state(CircuitState::Closed);
    }
}

/// Outcome handle for an admitted attempt.
///
/// Dropping it without calling [`success`](Self::success) or
/// [`failure`](Self::failure) leaves the counters untouched and frees the half-open
/// trial slot, which is what happens when a caller abandons an in-flight request.
#[must_use = "report the attempt outcome through the permit"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(&CircuitBreakerConfig::default())
    }

    fn trip(breaker: &CircuitBreaker) {
        for _ in 0..5 {
            breaker.on_failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_threshold() {
        let breaker = breaker();

        for _ in 0..4 {
            breaker.on_failure();
            assert!(breaker.allow_request());
        }
        assert_eq!(breaker.current_state(), CircuitState::Closed);

        breaker.on_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
        assert!(!breaker.allow_request());
        assert_eq!(breaker.retry_after(), Some(Duration::from_secs(30)));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!breaker.allow_request());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_counter_while_closed() {
        let breaker = breaker();
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.consecutive_failures(), 2);
        assert!(breaker.time_since_last_failure().is_some());

        breaker.on_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.current_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let breaker = breaker();
        trip(&breaker);
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(breaker.allow_request());
        breaker.on_success();

        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_rearms() {
        let breaker = breaker();
        trip(&breaker);
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(breaker.allow_request());
        breaker.on_failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(breaker.current_state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_single_trial() {
        let breaker = breaker();
        trip(&breaker);
        tokio::time::advance(Duration::from_secs(30)).await;

        let permit = breaker.acquire().expect("trial should be admitted");
        assert!(permit.is_trial());
        assert!(breaker.acquire().is_err());
        assert!(!breaker.allow_request());

        permit.success();
        assert!(breaker.acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_permit_cannot_settle_half_open() {
        let breaker = breaker();
        let stale = breaker.acquire().expect("closed circuit admits");
        assert!(!stale.is_trial());

        trip(&breaker);
        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = breaker.acquire().expect("trial should be admitted");

        stale.success();
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        assert!(breaker.acquire().is_err());

        trial.failure();
        assert_eq!(breaker.current_state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_failure_does_not_reopen_half_open() {
        let breaker = breaker();
        let stale = breaker.acquire().expect("closed circuit admits");

        trip(&breaker);
        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = breaker.acquire().expect("trial should be admitted");

        stale.failure();
        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);

        trial.success();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_releases_slot() {
        let breaker = breaker();
        trip(&breaker);
        tokio::time::advance(Duration::from_secs(30)).await;

        let failures_before = breaker.consecutive_failures();
        drop(breaker.acquire().expect("trial should be admitted"));

        assert_eq!(breaker.current_state(), CircuitState::HalfOpen);
        assert_eq!(breaker.consecutive_failures(), failures_before);
        assert!(breaker.acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_closes_immediately() {
        let breaker = breaker();
        trip(&breaker);
        assert!(breaker.acquire().is_err());

        breaker.reset();
        assert_eq!(breaker.current_state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.allow_request());
        assert!(breaker.retry_after().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_are_not_lost() {
        let breaker = std::sync::Arc::new(CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: 1_000,
            open_duration_ms: 30_000,
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let breaker = breaker.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    breaker.on_failure();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(breaker.consecutive_failures(), 400);
    }
}
