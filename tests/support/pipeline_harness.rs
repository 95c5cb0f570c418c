#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use prlens::classify::{Classifier, ClassifierResponse, PullRequestRecord, WorkItem};
use prlens::config::{Config, RateLimitConfig};
use prlens::error::ServiceError;
use prlens::runtime::memory::{MemoryStats, MemoryStatsSource};

pub const FEATURE_JSON: &str = r#"{"work_type":"feature","complexity_score":7,"risk_score":5,"clarity_score":8,"summary":"Adds a feature"}"#;

/// Answers every prompt with `FEATURE_JSON` unless a scripted failure
/// matches a substring of the prompt.
#[derive(Default)]
pub struct MockClassifier {
    failures: HashMap<String, ServiceError>,
    delays: HashMap<String, Duration>,
    calls: AtomicUsize,
    delay: Duration,
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when(mut self, needle: &str, error: ServiceError) -> Self {
        self.failures.insert(needle.to_string(), error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Overrides the delay for prompts containing `needle`.
    pub fn delay_when(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.insert(needle.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for MockClassifier {
    fn name(&self) -> &str {
        "mock"
    }

    fn classify<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ClassifierResponse, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self
                .delays
                .iter()
                .find(|(needle, _)| prompt.contains(needle.as_str()))
                .map_or(self.delay, |(_, delay)| *delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if let Some((_, error)) = self
                .failures
                .iter()
                .find(|(needle, _)| prompt.contains(needle.as_str()))
            {
                return Err(error.clone());
            }
            Ok(ClassifierResponse::new(FEATURE_JSON, 120, 30))
        })
    }
}

/// Memory source whose usage the test controls.
pub struct ScriptedMemory {
    pub used_mb: AtomicU64,
}

impl ScriptedMemory {
    pub const TOTAL_MB: u64 = 1000;

    pub fn new(used_mb: u64) -> Arc<Self> {
        Arc::new(Self {
            used_mb: AtomicU64::new(used_mb),
        })
    }

    pub fn set_used(&self, used_mb: u64) {
        self.used_mb.store(used_mb, Ordering::SeqCst);
    }
}

impl MemoryStatsSource for ScriptedMemory {
    fn name(&self) -> &str {
        "scripted"
    }

    fn sample(&self) -> Option<MemoryStats> {
        let used = self.used_mb.load(Ordering::SeqCst);
        Some(MemoryStats {
            total_mb: ScriptedMemory::TOTAL_MB,
            used_mb: used,
            available_mb: ScriptedMemory::TOTAL_MB.saturating_sub(used),
            process_mb: 64,
        })
    }
}

/// Defaults with checkpoints under `dir`, no pacing delay and no monitor.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.checkpoints.dir = dir.join("checkpoints").display().to_string();
    config.memory.monitor_enabled = false;
    config.rate_limits.insert(
        "classifier".to_string(),
        RateLimitConfig {
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
            ..RateLimitConfig::default()
        },
    );
    config
}

pub fn pull_request(number: u64, title: &str) -> PullRequestRecord {
    PullRequestRecord {
        repo: "acme/api".into(),
        number,
        title: title.into(),
        body: Some(format!("Body for #{number}")),
        author: Some("octocat".into()),
        additions: 40,
        deletions: 4,
        files_changed: vec!["src/lib.rs".into()],
        diff: format!("+ change {number}"),
    }
}

pub fn work_items(count: u64) -> Vec<WorkItem> {
    (1..=count)
        .map(|n| WorkItem::from_pull_request(&pull_request(n, &format!("Change {n}"))))
        .collect()
}
