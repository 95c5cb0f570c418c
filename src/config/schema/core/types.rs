use super::super::{
    BatchConfig, CacheConfig, CheckpointConfig, CircuitBreakerConfig, ClassifierConfig,
    MemoryConfig, RateLimitConfig, resilience::default_rate_limits,
};
use crate::error::ConfigError;
use anyhow::Result;
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Pacing profiles keyed by service name; unknown services fall back to `default`
    #[serde(default = "default_rate_limits")]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub checkpoints: CheckpointConfig,
}

fn default_log_level() -> String {
    "info".into()
}

pub(super) fn prlens_dir() -> PathBuf {
    let home = UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());
    home.join(".prlens")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_path: prlens_dir().join("config.toml"),
            log_level: default_log_level(),
            classifier: ClassifierConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limits: default_rate_limits(),
            cache: CacheConfig::default(),
            memory: MemoryConfig::default(),
            batch: BatchConfig::default(),
            checkpoints: CheckpointConfig::default(),
        }
    }
}

impl Config {
    /// Checkpoint directory with `~` and `$VARS` expanded.
    pub fn checkpoint_dir(&self) -> PathBuf {
        match shellexpand::full(&self.checkpoints.dir) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => PathBuf::from(shellexpand::tilde(&self.checkpoints.dir).as_ref()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let checks = || -> Result<()> {
            self.circuit_breaker.validate()?;
            for (service, limits) in &self.rate_limits {
                limits.validate(service)?;
            }
            self.memory.validate()?;
            self.batch.validate()?;
            if self.cache.max_entries == 0 {
                anyhow::bail!("cache.max_entries must be >= 1");
            }
            if !(0.0..=2.0).contains(&self.classifier.temperature) {
                anyhow::bail!("classifier.temperature must be in [0.0, 2.0]");
            }
            Ok(())
        };
        checks().map_err(|e| ConfigError::Validation(e.to_string()).into())
    }

    /// Returns `true` when no API key is available from the file or the environment.
    pub fn needs_api_key(&self) -> bool {
        if std::env::var("PRLENS_API_KEY").is_ok_and(|key| !key.is_empty()) {
            return false;
        }
        self.classifier
            .api_key
            .as_deref()
            .is_none_or(|key| key.trim().is_empty())
    }
}
