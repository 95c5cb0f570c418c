use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry lifetime measured from insertion
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
    /// Max entries before oldest-insertion eviction
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

fn default_cache_ttl_secs() -> u64 {
    3_600
}
fn default_cache_max_entries() -> usize {
    1_000
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Run the background pressure monitor
    #[serde(default = "default_monitor_enabled")]
    pub monitor_enabled: bool,
    /// Seconds between background samples
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// System memory used (percent) that counts as `warning`
    #[serde(default = "default_warning_percent")]
    pub warning_percent: f64,
    /// Explicit `critical` threshold; derived from `warning_percent` when unset
    #[serde(default)]
    pub critical_percent: Option<f64>,
    /// Consecutive failures before a cleanup callback is quarantined
    #[serde(default = "default_quarantine_after")]
    pub quarantine_after: u32,
}

fn default_monitor_enabled() -> bool {
    true
}
fn default_check_interval_secs() -> u64 {
    30
}
fn default_warning_percent() -> f64 {
    80.0
}
fn default_quarantine_after() -> u32 {
    3
}

impl MemoryConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    /// `critical_percent` if set, otherwise ten points above `warning_percent`, capped at 95.
    pub fn effective_critical_percent(&self) -> f64 {
        self.critical_percent
            .unwrap_or_else(|| (self.warning_percent + 10.0).min(95.0))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=100.0).contains(&self.warning_percent) {
            anyhow::bail!("memory.warning_percent must be in [0, 100]");
        }
        let critical = self.effective_critical_percent();
        if !(0.0..=100.0).contains(&critical) {
            anyhow::bail!("memory.critical_percent must be in [0, 100]");
        }
        if critical < self.warning_percent {
            anyhow::bail!("memory.critical_percent must be >= memory.warning_percent");
        }
        Ok(())
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            monitor_enabled: default_monitor_enabled(),
            check_interval_secs: default_check_interval_secs(),
            warning_percent: default_warning_percent(),
            critical_percent: None,
            quarantine_after: default_quarantine_after(),
        }
    }
}
