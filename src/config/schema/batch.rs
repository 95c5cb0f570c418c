use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Default worker pool size when the caller does not ask for one
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Ceiling applied to any requested pool size
    #[serde(default = "default_hard_max_concurrency")]
    pub hard_max_concurrency: usize,
    /// Per-item bound on the classification call
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    /// Submitted items between proactive memory checks (0 disables)
    #[serde(default = "default_memory_check_interval")]
    pub memory_check_interval: usize,
    /// Memory pre-flight requirement for a batch (0 disables)
    #[serde(default)]
    pub required_memory_mb: u64,
    /// Registry name of the breaker/limiter pair guarding the classifier
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_max_concurrency() -> usize {
    4
}
fn default_hard_max_concurrency() -> usize {
    16
}
fn default_task_timeout_secs() -> u64 {
    60
}
fn default_memory_check_interval() -> usize {
    10
}
fn default_service_name() -> String {
    "classifier".into()
}

impl BatchConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrency == 0 || self.hard_max_concurrency == 0 {
            anyhow::bail!("batch.max_concurrency and batch.hard_max_concurrency must be >= 1");
        }
        if self.task_timeout_secs == 0 {
            anyhow::bail!("batch.task_timeout_secs must be >= 1");
        }
        if self.service_name.trim().is_empty() {
            anyhow::bail!("batch.service_name must not be empty");
        }
        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            hard_max_concurrency: default_hard_max_concurrency(),
            task_timeout_secs: default_task_timeout_secs(),
            memory_check_interval: default_memory_check_interval(),
            required_memory_mb: 0,
            service_name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding checkpoint files and `manifest.json` (`~` is expanded)
    #[serde(default = "default_checkpoint_dir")]
    pub dir: String,
    /// Checkpoints retained per step by `checkpoints prune`
    #[serde(default = "default_keep")]
    pub keep: usize,
}

fn default_checkpoint_dir() -> String {
    "~/.prlens/checkpoints".into()
}
fn default_keep() -> usize {
    5
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            keep: default_keep(),
        }
    }
}
