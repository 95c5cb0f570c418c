use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Tuning shared by every circuit breaker created through the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures that trip a closed circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Initial wait before an open circuit admits a half-open probe.
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// Consecutive probe successes needed to close again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Samples required before the failure rate is consulted.
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: usize,
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    /// Growth applied to the recovery timeout on every trip after the first.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_recovery_timeout_ms")]
    pub max_recovery_timeout_ms: u64,
    /// How long a caller waits on an in-flight half-open probe before being rejected.
    #[serde(default = "default_probe_wait_ms")]
    pub probe_wait_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_ms() -> u64 {
    60_000
}
fn default_success_threshold() -> u32 {
    2
}
fn default_window_size() -> usize {
    20
}
fn default_minimum_calls() -> usize {
    10
}
fn default_failure_rate_threshold() -> f64 {
    0.5
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_recovery_timeout_ms() -> u64 {
    600_000
}
fn default_probe_wait_ms() -> u64 {
    200
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn max_recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.max_recovery_timeout_ms.max(self.recovery_timeout_ms))
    }

    pub fn probe_wait(&self) -> Duration {
        Duration::from_millis(self.probe_wait_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.failure_threshold == 0 {
            anyhow::bail!("circuit_breaker.failure_threshold must be >= 1");
        }
        if self.success_threshold == 0 {
            anyhow::bail!("circuit_breaker.success_threshold must be >= 1");
        }
        if self.window_size == 0 {
            anyhow::bail!("circuit_breaker.window_size must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.failure_rate_threshold) {
            anyhow::bail!("circuit_breaker.failure_rate_threshold must be in [0.0, 1.0]");
        }
        if self.backoff_multiplier < 1.0 {
            anyhow::bail!("circuit_breaker.backoff_multiplier must be >= 1.0");
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            success_threshold: default_success_threshold(),
            window_size: default_window_size(),
            minimum_calls: default_minimum_calls(),
            failure_rate_threshold: default_failure_rate_threshold(),
            backoff_multiplier: default_backoff_multiplier(),
            max_recovery_timeout_ms: default_max_recovery_timeout_ms(),
            probe_wait_ms: default_probe_wait_ms(),
        }
    }
}

/// Pacing profile for one external service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Successes in a row before the delay is relaxed.
    pub reset_threshold: u32,
    /// Fractional ± jitter applied to every wait.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_backoff_factor() -> f64 {
    2.0
}
fn default_jitter_factor() -> f64 {
    0.1
}

impl RateLimitConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms))
    }

    pub fn validate(&self, service: &str) -> anyhow::Result<()> {
        if self.backoff_factor < 1.0 {
            anyhow::bail!("rate_limits.{service}.backoff_factor must be >= 1.0");
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            anyhow::bail!("rate_limits.{service}.jitter_factor must be in [0.0, 1.0)");
        }
        if self.reset_threshold == 0 {
            anyhow::bail!("rate_limits.{service}.reset_threshold must be >= 1");
        }
        if self.max_delay_ms < self.base_delay_ms {
            anyhow::bail!("rate_limits.{service}.max_delay_ms must be >= base_delay_ms");
        }
        Ok(())
    }

    /// The classification API: slow base pace, long ceiling.
    pub fn classifier() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_factor: default_backoff_factor(),
            reset_threshold: 10,
            jitter_factor: default_jitter_factor(),
        }
    }

    /// The ticket tracker: cheaper calls, recovers faster.
    pub fn tickets() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: default_backoff_factor(),
            reset_threshold: 5,
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_factor: default_backoff_factor(),
            reset_threshold: 10,
            jitter_factor: default_jitter_factor(),
        }
    }
}

pub(in crate::config) fn default_rate_limits() -> BTreeMap<String, RateLimitConfig> {
    let mut limits = BTreeMap::new();
    limits.insert("classifier".to_string(), RateLimitConfig::classifier());
    limits.insert("tickets".to_string(), RateLimitConfig::tickets());
    limits
}
