use super::{AdaptiveRateLimiter, BreakerStats, CircuitBreaker, RateLimiterStats};
use crate::config::{CircuitBreakerConfig, Config, RateLimitConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

/// One breaker and one limiter per service name, shared by every caller that
/// holds the registry.
pub struct ServiceRegistry {
    breaker_config: CircuitBreakerConfig,
    rate_limits: BTreeMap<String, RateLimitConfig>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    limiters: Mutex<HashMap<String, Arc<AdaptiveRateLimiter>>>,
}

impl ServiceRegistry {
    pub fn new(
        breaker_config: CircuitBreakerConfig,
        rate_limits: BTreeMap<String, RateLimitConfig>,
    ) -> Self {
        Self {
            breaker_config,
            rate_limits,
            breakers: Mutex::new(HashMap::new()),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.circuit_breaker.clone(), config.rate_limits.clone())
    }

    pub fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(breakers.entry(service.to_string()).or_insert_with(|| {
            tracing::debug!(service, "creating circuit breaker");
            Arc::new(CircuitBreaker::new(service, self.breaker_config.clone()))
        }))
    }

    pub fn limiter(&self, service: &str) -> Arc<AdaptiveRateLimiter> {
        let mut limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(limiters.entry(service.to_string()).or_insert_with(|| {
            let profile = self
                .rate_limits
                .get(service)
                .or_else(|| self.rate_limits.get("default"))
                .cloned()
                .unwrap_or_default();
            tracing::debug!(service, base_delay_ms = profile.base_delay_ms, "creating rate limiter");
            Arc::new(AdaptiveRateLimiter::new(service, profile))
        }))
    }

    /// Stats for every breaker created so far, sorted by service name.
    pub fn breaker_stats(&self) -> Vec<BreakerStats> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<_> = breakers.values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.service.cmp(&b.service));
        stats
    }

    pub fn limiter_stats(&self) -> Vec<RateLimiterStats> {
        let limiters = self.limiters.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stats: Vec<_> = limiters.values().map(|l| l.stats()).collect();
        stats.sort_by(|a, b| a.service.cmp(&b.service));
        stats
    }

    pub fn reset_all(&self) {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        for breaker in breakers.values() {
            breaker.reset();
        }
    }
}
