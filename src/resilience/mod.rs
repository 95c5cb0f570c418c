//! Failure isolation and pacing for calls to external services.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod registry;

pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitState, StateChange};
pub use rate_limiter::{AdaptiveRateLimiter, RateLimiterStats};
pub use registry::ServiceRegistry;
