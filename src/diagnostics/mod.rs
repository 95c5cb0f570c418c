pub mod health;

pub use health::{ComponentHealth, HealthReport};
