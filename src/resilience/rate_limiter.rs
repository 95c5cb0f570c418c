use crate::config::RateLimitConfig;
use rand::Rng;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub service: String,
    pub current_delay_secs: f64,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
    pub consecutive_failures: u32,
    pub success_streak: u32,
}

struct LimiterState {
    last_request: Option<Instant>,
    current_delay: Duration,
    consecutive_failures: u32,
    success_streak: u32,
}

/// Paces calls to one service and adapts the pace to how the service responds.
///
/// Each [`wait_if_needed`](Self::wait_if_needed) reserves the next slot
/// `current_delay` after the previous one, so concurrent workers queue up
/// behind each other instead of firing together.
pub struct AdaptiveRateLimiter {
    service: String,
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

impl AdaptiveRateLimiter {
    pub fn new(service: impl Into<String>, config: RateLimitConfig) -> Self {
        let state = LimiterState {
            last_request: None,
            current_delay: config.base_delay(),
            consecutive_failures: 0,
            success_streak: 0,
        };
        Self {
            service: service.into(),
            config,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn current_delay(&self) -> Duration {
        self.lock().current_delay
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.config.jitter_factor;
        if jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let scale = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        delay.mul_f64(scale)
    }

    /// Sleeps until this caller's slot comes up. The slot is reserved under
    /// the lock; the sleep happens after it is released.
    pub async fn wait_if_needed(&self) {
        let wait = {
            let mut state = self.lock();
            let now = Instant::now();
            let slot = match state.last_request {
                Some(last) => (last + self.jittered(state.current_delay)).max(now),
                None => now,
            };
            state.last_request = Some(slot);
            slot.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tracing::trace!(
                service = self.service.as_str(),
                wait_ms = wait.as_millis() as u64,
                "rate limiter pacing"
            );
            tokio::time::sleep(wait).await;
        }
    }

    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.success_streak += 1;
        if state.success_streak >= self.config.reset_threshold {
            state.success_streak = 0;
            let relaxed = state
                .current_delay
                .div_f64(self.config.backoff_factor)
                .max(self.config.base_delay());
            if relaxed != state.current_delay {
                tracing::debug!(
                    service = self.service.as_str(),
                    delay_ms = relaxed.as_millis() as u64,
                    "rate limiter relaxed"
                );
            }
            state.current_delay = relaxed;
        }
    }

    pub fn record_failure(&self, is_rate_limit: bool) {
        let mut state = self.lock();
        state.success_streak = 0;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let factor = if is_rate_limit {
            self.config.backoff_factor * 1.5
        } else {
            self.config.backoff_factor
        };
        state.current_delay = state
            .current_delay
            .mul_f64(factor)
            .min(self.config.max_delay());
        tracing::debug!(
            service = self.service.as_str(),
            rate_limited = is_rate_limit,
            delay_ms = state.current_delay.as_millis() as u64,
            consecutive_failures = state.consecutive_failures,
            "rate limiter backed off"
        );
    }

    pub fn stats(&self) -> RateLimiterStats {
        let state = self.lock();
        RateLimiterStats {
            service: self.service.clone(),
            current_delay_secs: state.current_delay.as_secs_f64(),
            base_delay_secs: self.config.base_delay().as_secs_f64(),
            max_delay_secs: self.config.max_delay().as_secs_f64(),
            consecutive_failures: state.consecutive_failures,
            success_streak: state.success_streak,
        }
    }
}
