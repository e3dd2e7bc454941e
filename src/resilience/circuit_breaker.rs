//! # Generic Circuit Breaker
//!
//! Lock-free circuit breaker protecting a single named dependency. One
//! instance exists per registered dependency; the degradation coordinator
//! owns them and consumes their state-change notifications.
//!
//! ## States
//!
//! - **Closed**: normal operation, all calls pass through
//! - **Open**: too many consecutive failures, calls are rejected fast
//! - **Half-Open**: recovery timeout elapsed, a bounded number of probes test
//!   whether the dependency has recovered
//!
//! ## State Transitions
//!
//! ```text
//! Closed ──[failure_threshold consecutive failures]──> Open
//!   ▲                                                    │
//!   │                                                    │ [recovery_timeout elapses]
//!   │                                                    ▼
//!   └──[success_threshold probe successes]── HalfOpen ──[any probe failure]──> Open
//! ```
//!
//! State and counters are plain atomics; transitions are linearized with
//! compare-and-swap so concurrent callers cannot double-apply a transition.
//! Admitted operations still run concurrently.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};

/// Circuit breaker state. Numeric (u8) for atomic storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed = 0,
    /// Failing fast - calls rejected without running the operation
    Open = 1,
    /// Testing recovery - a bounded number of probes allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Closed,
            2 => Self::HalfOpen,
            // Invalid values map to Open (fail-safe: reject rather than admit)
            _ => Self::Open,
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without running the operation.
    /// Retryable once `retry_after` has elapsed.
    #[error("circuit breaker '{service}' is open; retry in {retry_after:?}")]
    Open {
        service: String,
        retry_after: Duration,
    },

    /// The operation ran and failed; the failure was recorded on the breaker.
    #[error(transparent)]
    Inner(E),
}

/// Observed state transition, delivered to the listener injected at
/// construction time. The metrics snapshot is taken at the moment of the
/// transition so listeners can derive health without touching the breaker.
pub struct StateChange<'a> {
    pub service: &'a str,
    pub from: CircuitState,
    pub to: CircuitState,
    pub metrics: CircuitBreakerMetrics,
}

/// Callback invoked synchronously on every state transition.
pub type StateListener = Arc<dyn Fn(StateChange<'_>) + Send + Sync>;

/// Circuit breaker for a single named dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    half_open_admitted: AtomicU32,
    half_open_successes: AtomicU32,
    total_duration_micros: AtomicU64,
    created_at: Instant,
    /// Micros since `created_at` at the last state transition
    last_transition_micros: AtomicU64,
    listener: Option<StateListener>,
}

impl CircuitBreaker {
    /// Create a circuit breaker with no state listener.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::build(name.into(), config, None)
    }

    /// Create a circuit breaker that notifies `listener` on every state
    /// transition. The listener is invoked synchronously from the call that
    /// caused the transition.
    pub fn with_state_listener(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        listener: StateListener,
    ) -> Self {
        Self::build(name.into(), config, Some(listener))
    }

    fn build(name: String, config: CircuitBreakerConfig, listener: Option<StateListener>) -> Self {
        debug!(
            service = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            half_open_admitted: AtomicU32::new(0),
            half_open_successes: AtomicU32::new(0),
            total_duration_micros: AtomicU64::new(0),
            created_at: Instant::now(),
            last_transition_micros: AtomicU64::new(0),
            listener,
        }
    }

    /// The dependency name this breaker protects.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check if the circuit allows the next call.
    ///
    /// Closed always allows. Open allows only once the recovery timeout has
    /// elapsed, transitioning to half-open so the call acts as a probe.
    /// Half-open admits at most `success_threshold` outstanding probes.
    pub fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.since_last_transition() < self.config.recovery_timeout {
                    return false;
                }
                // The transition may race with other callers; whoever sees
                // HalfOpen competes for a probe slot.
                self.transition(CircuitState::Open, CircuitState::HalfOpen);
                self.state() == CircuitState::HalfOpen && self.admit_probe()
            }
            CircuitState::HalfOpen => self.admit_probe(),
        }
    }

    /// Record a successful operation with its duration.
    ///
    /// Closed: resets the consecutive failure count. Half-open: counts toward
    /// `success_threshold`; reaching it closes the circuit and resets all
    /// counters.
    pub fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);

        match self.state() {
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.transition(CircuitState::HalfOpen, CircuitState::Closed);
                }
            }
            // Late result from a call admitted before a force_open; the
            // rejection gate already covers new callers.
            CircuitState::Open => {}
        }
    }

    /// Record a failed operation with its duration.
    ///
    /// Closed: opens the circuit once the consecutive failure count reaches
    /// the threshold. Half-open: any probe failure re-opens the circuit and
    /// restarts the cool-down clock.
    pub fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match self.state() {
            CircuitState::Closed => {
                if consecutive >= u64::from(self.config.failure_threshold) {
                    self.transition(CircuitState::Closed, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(CircuitState::HalfOpen, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Execute an operation through the breaker.
    ///
    /// Returns [`BreakerError::Open`] without running the operation when the
    /// circuit rejects the call; otherwise runs the operation, records its
    /// outcome and duration, and propagates the original error as
    /// [`BreakerError::Inner`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.should_allow() {
            return Err(BreakerError::Open {
                service: self.name.clone(),
                retry_after: self.retry_after(),
            });
        }

        let start = Instant::now();
        match operation().await {
            Ok(value) => {
                self.record_success(start.elapsed());
                Ok(value)
            }
            Err(error) => {
                self.record_failure(start.elapsed());
                Err(BreakerError::Inner(error))
            }
        }
    }

    /// How long until an open circuit will admit a probe. Zero when the
    /// circuit is not open or the cool-down has already elapsed.
    pub fn retry_after(&self) -> Duration {
        match self.state() {
            CircuitState::Open => self
                .config
                .recovery_timeout
                .saturating_sub(self.since_last_transition()),
            _ => Duration::ZERO,
        }
    }

    /// Whether the breaker currently considers the dependency healthy.
    pub fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }

    /// Force the circuit to open state (emergency kill switch).
    pub fn force_open(&self) {
        self.force(CircuitState::Open);
    }

    /// Force the circuit to closed state (emergency recovery).
    pub fn force_closed(&self) {
        self.force(CircuitState::Closed);
    }

    /// Snapshot the breaker's counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let total_micros = self.total_duration_micros.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
                Duration::from_micros(total_micros / total_calls),
            )
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            current_state: self.state(),
            failure_rate,
            success_rate,
            average_duration,
        }
    }

    fn since_last_transition(&self) -> Duration {
        let at = Duration::from_micros(self.last_transition_micros.load(Ordering::Acquire));
        self.created_at.elapsed().saturating_sub(at)
    }

    /// Admit a half-open probe if the probe budget has room.
    fn admit_probe(&self) -> bool {
        self.half_open_admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |admitted| {
                (admitted < self.config.success_threshold).then_some(admitted + 1)
            })
            .is_ok()
    }

    /// Attempt the `from -> to` transition. Returns false if another caller
    /// moved the state first; the transition's side effects run exactly once.
    fn transition(&self, from: CircuitState, to: CircuitState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            self.after_transition(from, to);
        }
        swapped
    }

    /// Unconditionally set the state (force_open/force_closed).
    fn force(&self, to: CircuitState) {
        let from = CircuitState::from(self.state.swap(to as u8, Ordering::AcqRel));
        if from != to {
            warn!(service = %self.name, from = ?from, to = ?to, "Circuit breaker state forced");
            self.after_transition(from, to);
        }
    }

    fn after_transition(&self, from: CircuitState, to: CircuitState) {
        self.last_transition_micros
            .store(self.created_at.elapsed().as_micros() as u64, Ordering::Release);

        match to {
            // Counters reset on every transition into Closed
            CircuitState::Closed => {
                self.total_calls.store(0, Ordering::Relaxed);
                self.success_count.store(0, Ordering::Relaxed);
                self.failure_count.store(0, Ordering::Relaxed);
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.total_duration_micros.store(0, Ordering::Relaxed);
                self.half_open_admitted.store(0, Ordering::Relaxed);
                self.half_open_successes.store(0, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                self.half_open_admitted.store(0, Ordering::Relaxed);
                self.half_open_successes.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }

        info!(
            service = %self.name,
            from = ?from,
            to = ?to,
            "Circuit breaker state transition"
        );

        if let Some(listener) = &self.listener {
            listener(StateChange {
                service: &self.name,
                from,
                to,
                metrics: self.metrics(),
            });
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn breaker(failure_threshold: u32, recovery_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout,
                success_threshold: 1,
            },
        )
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let cb = breaker(3, Duration::from_secs(5));
        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_opens_after_threshold_failures() {
        let cb = breaker(3, Duration::from_secs(5));

        cb.record_failure(Duration::ZERO);
        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow());
    }

    #[test]
    fn test_circuit_opens_at_exact_threshold() {
        let cb = breaker(5, Duration::from_secs(30));

        for i in 1..5 {
            cb.record_failure(Duration::ZERO);
            assert!(
                cb.should_allow(),
                "circuit should be closed at {} failures (threshold is 5)",
                i
            );
        }

        cb.record_failure(Duration::ZERO);
        assert!(!cb.should_allow());
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let cb = breaker(10, Duration::from_secs(30));

        cb.record_failure(Duration::ZERO);
        cb.record_failure(Duration::ZERO);
        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.metrics().consecutive_failures, 3);

        cb.record_success(Duration::ZERO);
        assert_eq!(cb.metrics().consecutive_failures, 0);
    }

    #[test]
    fn test_successful_probe_closes_and_resets() {
        // Zero recovery timeout: the next should_allow() after opening is a probe
        let cb = breaker(2, Duration::ZERO);

        cb.record_failure(Duration::ZERO);
        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.should_allow()); // admitted as the half-open probe
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().consecutive_failures, 0);
        assert_eq!(cb.metrics().total_calls, 0);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let cb = breaker(2, Duration::ZERO);

        cb.record_failure(Duration::ZERO);
        cb.record_failure(Duration::ZERO);
        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_until_timeout_elapses() {
        let cb = breaker(1, Duration::from_millis(30));

        cb.record_failure(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.should_allow());
        assert!(cb.retry_after() > Duration::ZERO);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cb.should_allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_probe_budget_is_bounded() {
        let cb = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 1,
                recovery_timeout: Duration::ZERO,
                success_threshold: 2,
            },
        );

        cb.record_failure(Duration::ZERO);
        assert!(cb.should_allow()); // probe 1
        assert!(cb.should_allow()); // probe 2
        assert!(!cb.should_allow()); // budget exhausted

        cb.record_success(Duration::ZERO);
        cb.record_success(Duration::ZERO);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_execute_rejects_without_running_operation() {
        let cb = breaker(3, Duration::from_secs(60));
        let invocations = AtomicUsize::new(0);

        for _ in 0..3 {
            let result: Result<(), _> = cb
                .execute(|| async {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(std::io::Error::other("down"))
                })
                .await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(invocations.load(Ordering::SeqCst), 3);

        // 4th call: rejected with zero additional invocations
        let result: Result<(), _> = cb
            .execute(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<(), std::io::Error>(())
            })
            .await;
        assert!(matches!(result, Err(BreakerError::Open { .. })));
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_success_path() {
        let cb = breaker(3, Duration::from_secs(5));
        let result: Result<i32, BreakerError<std::io::Error>> =
            cb.execute(|| async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.metrics().success_count, 1);
    }

    #[test]
    fn test_force_operations() {
        let cb = breaker(5, Duration::from_secs(30));

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.force_closed();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_state_listener_observes_transitions() {
        let seen: Arc<Mutex<Vec<(CircuitState, CircuitState)>>> = Arc::new(Mutex::new(Vec::new()));
        let listener_seen = Arc::clone(&seen);
        let cb = CircuitBreaker::with_state_listener(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::ZERO,
                success_threshold: 1,
            },
            Arc::new(move |change: StateChange<'_>| {
                listener_seen.lock().unwrap().push((change.from, change.to));
            }),
        );

        cb.record_failure(Duration::ZERO);
        cb.record_failure(Duration::ZERO);
        assert!(cb.should_allow());
        cb.record_success(Duration::ZERO);

        let transitions = seen.lock().unwrap().clone();
        assert_eq!(
            transitions,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_circuit_state_from_u8_conversion() {
        assert_eq!(CircuitState::from(0), CircuitState::Closed);
        assert_eq!(CircuitState::from(1), CircuitState::Open);
        assert_eq!(CircuitState::from(2), CircuitState::HalfOpen);
        // Invalid values default to Open (safest)
        assert_eq!(CircuitState::from(3), CircuitState::Open);
        assert_eq!(CircuitState::from(255), CircuitState::Open);
    }

    #[test]
    fn test_metrics_failure_rate() {
        let cb = breaker(10, Duration::from_secs(30));

        cb.record_success(Duration::from_millis(10));
        cb.record_failure(Duration::from_millis(30));

        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 2);
        assert!((metrics.failure_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.average_duration, Duration::from_millis(20));
    }
}
