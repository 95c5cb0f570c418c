pub mod schema;

pub use schema::{
    BatchConfig, CacheConfig, CheckpointConfig, CircuitBreakerConfig, ClassifierConfig, Config,
    MemoryConfig, RateLimitConfig,
};
