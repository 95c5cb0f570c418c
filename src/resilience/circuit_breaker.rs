use crate::config::CircuitBreakerConfig;
use crate::error::{CallError, CircuitOpen, ErrorKind, ServiceError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const RECENT_STATE_CHANGES: usize = 10;
const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub service: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    /// Failure rate over the sliding window, not lifetime totals.
    pub failure_rate: f64,
    pub recovery_timeout_secs: f64,
    pub trips: u32,
    pub recent_state_changes: Vec<StateChange>,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    window: VecDeque<bool>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    opened_at: Option<Instant>,
    recovery_timeout: Duration,
    trips: u32,
    probe: Option<u64>,
    next_probe_id: u64,
    state_changes: VecDeque<StateChange>,
}

impl BreakerInner {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            window: VecDeque::with_capacity(config.window_size),
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            opened_at: None,
            recovery_timeout: config.recovery_timeout(),
            trips: 0,
            probe: None,
            next_probe_id: 0,
            state_changes: VecDeque::with_capacity(RECENT_STATE_CHANGES),
        }
    }

    fn window_failure_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        failures as f64 / self.window.len() as f64
    }

    fn remaining_open(&self) -> Duration {
        self.opened_at
            .map(|at| self.recovery_timeout.saturating_sub(at.elapsed()))
            .unwrap_or_default()
    }
}

enum Admission {
    Proceed { probe: Option<u64> },
    ProbeBusy,
    Rejected(CircuitOpen),
}

/// Per-service failure isolation.
///
/// `Closed` passes calls through and counts failures. Too many consecutive
/// failures, or a high failure rate over the sliding window, trips the
/// circuit `Open`: calls are rejected without running until the recovery
/// timeout elapses. The next caller then becomes the single `HalfOpen`
/// probe; `success_threshold` probe successes close the circuit and any
/// counted probe failure re-opens it with a longer timeout.
///
/// All state sits behind one mutex that is never held across an await.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// Releases the half-open probe slot if the probe future is dropped early.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: Option<u64>,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.probe {
            let mut inner = self.breaker.lock();
            if inner.probe == Some(id) {
                inner.probe = None;
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = BreakerInner::new(&config);
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.lock().recovery_timeout
    }

    /// Runs `f` under breaker protection.
    ///
    /// `f` is not invoked when the circuit rejects the call. Transient and
    /// rate-limited errors count as failures; fatal errors are returned
    /// without being counted; ignored errors come back as
    /// [`CallError::Ignored`] and leave the state untouched.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let probe = self.acquire().await?;
        let _guard = ProbeGuard {
            breaker: self,
            probe,
        };

        match f().await {
            Ok(value) => {
                self.record_success(probe);
                Ok(value)
            }
            Err(err) => match err.kind() {
                ErrorKind::Transient | ErrorKind::RateLimited => {
                    self.record_failure(probe, &err);
                    Err(CallError::Service(err))
                }
                ErrorKind::Fatal => {
                    tracing::debug!(
                        service = self.service.as_str(),
                        error = %err,
                        "non-retryable error not counted against circuit"
                    );
                    Err(CallError::Service(err))
                }
                ErrorKind::Ignored => Err(CallError::Ignored(err)),
            },
        }
    }

    /// Like [`call`](Self::call), but an ignored error yields `Ok(None)`.
    pub async fn call_or_none<T, F, Fut>(&self, f: F) -> Result<Option<T>, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        match self.call(f).await {
            Ok(value) => Ok(Some(value)),
            Err(CallError::Ignored(err)) => {
                tracing::debug!(service = self.service.as_str(), error = %err, "ignored error swallowed");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn acquire(&self) -> Result<Option<u64>, CallError> {
        let deadline = Instant::now() + self.config.probe_wait();
        loop {
            match self.admit() {
                Admission::Proceed { probe } => return Ok(probe),
                Admission::Rejected(open) => return Err(open.into()),
                Admission::ProbeBusy => {
                    if Instant::now() >= deadline {
                        let mut inner = self.lock();
                        inner.rejected_calls += 1;
                        return Err(CircuitOpen {
                            service: self.service.clone(),
                            retry_after: PROBE_POLL_INTERVAL,
                        }
                        .into());
                    }
                    tokio::time::sleep(PROBE_POLL_INTERVAL).await;
                }
            }
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Proceed { probe: None },
            CircuitState::Open => {
                let remaining = inner.remaining_open();
                if remaining.is_zero() {
                    self.transition(&mut inner, CircuitState::HalfOpen, "recovery timeout elapsed");
                    Admission::Proceed {
                        probe: Some(Self::claim_probe(&mut inner)),
                    }
                } else {
                    inner.rejected_calls += 1;
                    Admission::Rejected(CircuitOpen {
                        service: self.service.clone(),
                        retry_after: remaining,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe.is_some() {
                    Admission::ProbeBusy
                } else {
                    Admission::Proceed {
                        probe: Some(Self::claim_probe(&mut inner)),
                    }
                }
            }
        }
    }

    fn claim_probe(inner: &mut BreakerInner) -> u64 {
        inner.next_probe_id += 1;
        inner.probe = Some(inner.next_probe_id);
        inner.next_probe_id
    }

    fn push_outcome(&self, inner: &mut BreakerInner, ok: bool) {
        if inner.window.len() >= self.config.window_size {
            inner.window.pop_front();
        }
        inner.window.push_back(ok);
    }

    fn is_current_probe(inner: &BreakerInner, probe: Option<u64>) -> bool {
        probe.is_some() && inner.probe == probe
    }

    fn record_success(&self, probe: Option<u64>) {
        let mut inner = self.lock();
        inner.total_calls += 1;
        inner.successful_calls += 1;
        self.push_outcome(&mut inner, true);
        inner.consecutive_failures = 0;

        // Calls admitted before the circuit tripped never count as probes.
        if inner.state == CircuitState::HalfOpen && Self::is_current_probe(&inner, probe) {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                inner.half_open_successes = 0;
                inner.window.clear();
                self.transition(&mut inner, CircuitState::Closed, "probe successes reached threshold");
                tracing::info!(service = self.service.as_str(), "circuit closed");
            }
        }
    }

    fn record_failure(&self, probe: Option<u64>, err: &ServiceError) {
        let mut inner = self.lock();
        inner.total_calls += 1;
        inner.failed_calls += 1;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        self.push_outcome(&mut inner, false);

        match inner.state {
            CircuitState::HalfOpen => {
                if Self::is_current_probe(&inner, probe) {
                    self.trip(&mut inner, &format!("probe failed: {err}"));
                }
            }
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let reason = format!("{} consecutive failures", inner.consecutive_failures);
                    self.trip(&mut inner, &reason);
                } else if inner.window.len() >= self.config.minimum_calls
                    && inner.window_failure_rate() >= self.config.failure_rate_threshold
                {
                    let reason = format!(
                        "failure rate {:.2} over {} calls",
                        inner.window_failure_rate(),
                        inner.window.len()
                    );
                    self.trip(&mut inner, &reason);
                }
            }
            // A call admitted while closed finished after another tripped the circuit.
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner, reason: &str) {
        inner.trips += 1;
        if inner.trips > 1 {
            let grown = inner
                .recovery_timeout
                .mul_f64(self.config.backoff_multiplier);
            inner.recovery_timeout = grown.min(self.config.max_recovery_timeout());
        }
        inner.half_open_successes = 0;
        inner.opened_at = Some(Instant::now());
        self.transition(inner, CircuitState::Open, reason);
        tracing::warn!(
            service = self.service.as_str(),
            reason,
            recovery_timeout_ms = inner.recovery_timeout.as_millis() as u64,
            "circuit opened"
        );
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState, reason: &str) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        if inner.state_changes.len() >= RECENT_STATE_CHANGES {
            inner.state_changes.pop_front();
        }
        inner.state_changes.push_back(StateChange {
            from,
            to,
            at: Utc::now(),
            reason: reason.to_string(),
        });
        tracing::debug!(
            service = self.service.as_str(),
            from = %from,
            to = %to,
            reason,
            "circuit state change"
        );
    }

    /// Forces `Closed`, clears counters and restores the initial recovery timeout.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, CircuitState::Closed, "manual reset");
        let changes = std::mem::take(&mut inner.state_changes);
        *inner = BreakerInner::new(&self.config);
        inner.state_changes = changes;
        tracing::info!(service = self.service.as_str(), "circuit reset");
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        let success_rate = if inner.total_calls == 0 {
            1.0
        } else {
            inner.successful_calls as f64 / inner.total_calls as f64
        };
        BreakerStats {
            service: self.service.clone(),
            state: inner.state,
            total_calls: inner.total_calls,
            successful_calls: inner.successful_calls,
            failed_calls: inner.failed_calls,
            rejected_calls: inner.rejected_calls,
            consecutive_failures: inner.consecutive_failures,
            success_rate,
            failure_rate: inner.window_failure_rate(),
            recovery_timeout_secs: inner.recovery_timeout.as_secs_f64(),
            trips: inner.trips,
            recent_state_changes: inner.state_changes.iter().cloned().collect(),
        }
    }
}
