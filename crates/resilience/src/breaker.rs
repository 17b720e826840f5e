//! Per-dependency circuit breaker.
//!
//! State machine: `Closed → Open` when failures within the sliding window
//! reach the threshold; `Open → HalfOpen` after the cooldown elapses;
//! `HalfOpen` admits exactly one trial call — success closes the circuit,
//! failure reopens it with the cooldown grown by the backoff factor (capped).
//! Calls rejected while open never reach the dependency.

use gridiron_config::BreakerConfig;
use gridiron_core::{CircuitState, DependencyHealthSnapshot, Error, ErrorKind, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What `before_call` admitted: a normal pass-through or the single
/// half-open trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Pass,
    Trial,
}

/// Admission token for one call. `complete` reports the outcome; dropping
/// the guard unreported counts the call as failed, so a caller cancelled
/// mid-trial (deadline, dropped future) reopens the circuit instead of
/// leaving it wedged half-open.
pub struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    kind: CallKind,
    reported: bool,
}

impl std::fmt::Debug for CallGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallGuard")
            .field("kind", &self.kind)
            .field("reported", &self.reported)
            .finish_non_exhaustive()
    }
}

impl CallGuard<'_> {
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn complete(mut self, ok: bool) {
        self.reported = true;
        self.breaker.after_call(self.kind, ok);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.after_call(self.kind, false);
        }
    }
}

struct BreakerState {
    state: CircuitState,
    /// Failure timestamps, pruned to the sliding window.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    current_cooldown: Duration,
}

/// Circuit breaker for one named dependency.
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        let current_cooldown = Duration::from_millis(config.cooldown_ms);
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                trial_in_flight: false,
                current_cooldown,
            }),
        }
    }

    /// Admission check. `Err` means fail fast without touching the
    /// dependency; `Ok(guard)` must be completed with the call's outcome
    /// (dropping the guard reports failure).
    pub fn before_call(&self) -> Result<CallGuard<'_>> {
        let kind = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();

            match inner.state {
                CircuitState::Closed => CallKind::Pass,
                CircuitState::Open => {
                    let elapsed = inner
                        .opened_at
                        .map(|t| now.duration_since(t))
                        .unwrap_or(Duration::ZERO);
                    if elapsed >= inner.current_cooldown {
                        info!(dependency = %self.dependency, "Circuit half-open, admitting trial call");
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_in_flight = true;
                        CallKind::Trial
                    } else {
                        let remaining = inner.current_cooldown - elapsed;
                        return Err(Error::DependencyUnavailable {
                            dependency: self.dependency.clone(),
                            reason: format!("circuit open, retry in {}ms", remaining.as_millis()),
                        });
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.trial_in_flight {
                        return Err(Error::DependencyUnavailable {
                            dependency: self.dependency.clone(),
                            reason: "circuit half-open, trial call in flight".into(),
                        });
                    }
                    inner.trial_in_flight = true;
                    CallKind::Trial
                }
            }
        };
        Ok(CallGuard {
            breaker: self,
            kind,
            reported: false,
        })
    }

    /// Record the outcome of an admitted call.
    fn after_call(&self, kind: CallKind, ok: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        match kind {
            CallKind::Trial => {
                inner.trial_in_flight = false;
                if ok {
                    info!(dependency = %self.dependency, "Trial call succeeded, circuit closed");
                    inner.state = CircuitState::Closed;
                    inner.failures.clear();
                    inner.opened_at = None;
                    inner.current_cooldown = Duration::from_millis(self.config.cooldown_ms);
                } else {
                    inner.current_cooldown = grow_cooldown(
                        inner.current_cooldown,
                        self.config.backoff_factor,
                        Duration::from_millis(self.config.max_cooldown_ms),
                    );
                    warn!(
                        dependency = %self.dependency,
                        cooldown_ms = inner.current_cooldown.as_millis() as u64,
                        "Trial call failed, circuit reopened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CallKind::Pass => {
                if ok {
                    inner.failures.clear();
                } else {
                    let window = Duration::from_secs(self.config.window_secs);
                    while inner
                        .failures
                        .front()
                        .is_some_and(|t| now.duration_since(*t) > window)
                    {
                        inner.failures.pop_front();
                    }
                    inner.failures.push_back(now);
                    if inner.failures.len() as u32 >= self.config.failure_threshold {
                        warn!(
                            dependency = %self.dependency,
                            failures = inner.failures.len(),
                            "Failure threshold reached, circuit opened"
                        );
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(now);
                    }
                }
            }
        }
    }

    /// Convenience wrapper running a future under an admission guard.
    /// Validation errors from the call do not count against the dependency.
    /// Cancellation-safe: if the returned future is dropped mid-call, the
    /// guard reports the call as failed.
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let guard = self.before_call()?;
        let result = fut.await;
        let ok = match &result {
            Ok(_) => true,
            Err(e) => e.kind() == ErrorKind::Validation,
        };
        guard.complete(ok);
        result
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn snapshot(&self) -> DependencyHealthSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        DependencyHealthSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            consecutive_failures: inner.failures.len() as u32,
        }
    }
}

fn grow_cooldown(current: Duration, factor: f64, max: Duration) -> Duration {
    let grown = Duration::from_millis((current.as_millis() as f64 * factor) as u64);
    grown.min(max)
}

/// One breaker per dependency name, created on first use.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// The breaker for `dependency`, creating it if absent.
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(breakers.entry(dependency.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(dependency, self.config.clone()))
        }))
    }

    /// Health snapshots for every known dependency, sorted by name.
    pub fn snapshots(&self) -> Vec<DependencyHealthSnapshot> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshots: Vec<_> = breakers.values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }
}
