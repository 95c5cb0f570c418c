mod batch;
mod classifier;
mod core;
mod memory;
mod resilience;

pub use batch::{BatchConfig, CheckpointConfig};
pub use classifier::ClassifierConfig;
pub use core::Config;
pub use memory::{CacheConfig, MemoryConfig};
pub use resilience::{CircuitBreakerConfig, RateLimitConfig};
