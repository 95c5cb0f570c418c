use super::stats::{FallbackSource, MemoryStats, MemoryStatsSource};
use crate::config::MemoryConfig;
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PressureLevel {
    Normal,
    Warning,
    Critical,
    /// No memory source produced a sample.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupId(u64);

type CleanupFn = Arc<dyn Fn() -> anyhow::Result<usize> + Send + Sync>;

struct CleanupEntry {
    id: CleanupId,
    name: String,
    callback: CleanupFn,
    consecutive_failures: u32,
    quarantined: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Total items reported freed by successful callbacks.
    pub freed: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Quarantined callbacks that were not run.
    pub skipped: Vec<String>,
    pub newly_quarantined: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryCheck {
    pub stats: Option<MemoryStats>,
    pub level: PressureLevel,
    /// Present when the level was critical and cleanup ran.
    pub cleanup: Option<CleanupReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryMonitorStats {
    pub total_mb: Option<u64>,
    pub used_mb: Option<u64>,
    pub available_mb: Option<u64>,
    pub process_mb: Option<u64>,
    pub used_percent: Option<f64>,
    pub pressure_level: PressureLevel,
    pub warning_percent: f64,
    pub critical_percent: f64,
    pub registered_cleanups: usize,
    pub quarantined_cleanups: Vec<String>,
}

/// Samples memory usage, classifies pressure, and relieves it through
/// registered cleanup callbacks.
///
/// The callback list has its own lock. Callbacks run after it is released,
/// so a callback may itself register or unregister cleanups.
pub struct MemoryPressureMonitor {
    source: Box<dyn MemoryStatsSource>,
    warning_percent: f64,
    critical_percent: f64,
    quarantine_after: u32,
    cleanups: Mutex<Vec<CleanupEntry>>,
    next_id: AtomicU64,
    last_level: Mutex<PressureLevel>,
}

impl MemoryPressureMonitor {
    pub fn new(config: &MemoryConfig) -> Self {
        Self::with_source(config, Box::new(FallbackSource::system_default()))
    }

    pub fn with_source(config: &MemoryConfig, source: Box<dyn MemoryStatsSource>) -> Self {
        Self {
            source,
            warning_percent: config.warning_percent,
            critical_percent: config.effective_critical_percent(),
            quarantine_after: config.quarantine_after.max(1),
            cleanups: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            last_level: Mutex::new(PressureLevel::Unknown),
        }
    }

    fn cleanups(&self) -> MutexGuard<'_, Vec<CleanupEntry>> {
        self.cleanups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a cleanup callback returning how many items it freed.
    ///
    /// Registering under an existing name replaces that callback and lifts
    /// any quarantine on it.
    pub fn register_cleanup<F>(&self, name: impl Into<String>, callback: F) -> CleanupId
    where
        F: Fn() -> anyhow::Result<usize> + Send + Sync + 'static,
    {
        let name = name.into();
        let callback: CleanupFn = Arc::new(callback);
        let mut cleanups = self.cleanups();

        if let Some(existing) = cleanups.iter_mut().find(|entry| entry.name == name) {
            existing.callback = callback;
            existing.consecutive_failures = 0;
            existing.quarantined = false;
            tracing::debug!(cleanup = name.as_str(), "cleanup callback replaced");
            return existing.id;
        }

        let id = CleanupId(self.next_id.fetch_add(1, Ordering::Relaxed));
        cleanups.push(CleanupEntry {
            id,
            name,
            callback,
            consecutive_failures: 0,
            quarantined: false,
        });
        id
    }

    pub fn unregister_cleanup(&self, id: CleanupId) -> bool {
        let mut cleanups = self.cleanups();
        let before = cleanups.len();
        cleanups.retain(|entry| entry.id != id);
        cleanups.len() != before
    }

    /// Runs every non-quarantined cleanup callback regardless of pressure.
    pub fn force_cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();
        let runnable: Vec<(CleanupId, String, CleanupFn)> = {
            let cleanups = self.cleanups();
            cleanups
                .iter()
                .filter_map(|entry| {
                    if entry.quarantined {
                        report.skipped.push(entry.name.clone());
                        None
                    } else {
                        Some((entry.id, entry.name.clone(), Arc::clone(&entry.callback)))
                    }
                })
                .collect()
        };

        let mut outcomes = Vec::with_capacity(runnable.len());
        for (id, name, callback) in runnable {
            let ok = match catch_unwind(AssertUnwindSafe(|| callback())) {
                Ok(Ok(freed)) => {
                    report.freed += freed;
                    report.succeeded.push(name.clone());
                    tracing::debug!(cleanup = name.as_str(), freed, "cleanup callback ran");
                    true
                }
                Ok(Err(err)) => {
                    tracing::warn!(cleanup = name.as_str(), error = %err, "cleanup callback failed");
                    report.failed.push(name.clone());
                    false
                }
                Err(_) => {
                    tracing::warn!(cleanup = name.as_str(), "cleanup callback panicked");
                    report.failed.push(name.clone());
                    false
                }
            };
            outcomes.push((id, ok));
        }

        let mut cleanups = self.cleanups();
        for (id, ok) in outcomes {
            // Unregistered while running.
            let Some(entry) = cleanups.iter_mut().find(|entry| entry.id == id) else {
                continue;
            };
            if ok {
                entry.consecutive_failures = 0;
                continue;
            }
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= self.quarantine_after {
                entry.quarantined = true;
                report.newly_quarantined.push(entry.name.clone());
                tracing::warn!(
                    cleanup = entry.name.as_str(),
                    failures = entry.consecutive_failures,
                    "cleanup callback quarantined"
                );
            }
        }

        report
    }

    pub fn sample(&self) -> Option<MemoryStats> {
        self.source.sample()
    }

    pub fn classify(&self, stats: Option<&MemoryStats>) -> PressureLevel {
        let Some(stats) = stats else {
            return PressureLevel::Unknown;
        };
        let used = stats.used_percent();
        if used >= self.critical_percent {
            PressureLevel::Critical
        } else if used >= self.warning_percent {
            PressureLevel::Warning
        } else {
            PressureLevel::Normal
        }
    }

    /// Samples memory, logs level changes, and runs cleanup on critical pressure.
    pub fn check_memory_usage(&self) -> MemoryCheck {
        let stats = self.sample();
        let level = self.classify(stats.as_ref());

        let previous = {
            let mut last = self.last_level.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *last, level)
        };
        if previous != level {
            let used_percent = stats.map(|s| s.used_percent());
            match level {
                PressureLevel::Critical => {
                    tracing::error!(?used_percent, from = %previous, "memory pressure critical");
                }
                PressureLevel::Warning => {
                    tracing::warn!(?used_percent, from = %previous, "memory pressure warning");
                }
                PressureLevel::Normal => {
                    tracing::info!(?used_percent, from = %previous, "memory pressure normal");
                }
                PressureLevel::Unknown => {
                    tracing::debug!("memory stats unavailable; pressure unknown");
                }
            }
        }

        let cleanup = (level == PressureLevel::Critical).then(|| {
            let report = self.force_cleanup();
            tracing::info!(
                freed = report.freed,
                failed = report.failed.len(),
                "critical memory cleanup finished"
            );
            report
        });

        MemoryCheck {
            stats,
            level,
            cleanup,
        }
    }

    /// Whether `required_mb` is currently available. Unknown counts as available.
    pub fn check_memory_available(&self, required_mb: u64) -> bool {
        match self.sample() {
            Some(stats) => {
                let ok = stats.available_mb >= required_mb;
                if !ok {
                    tracing::warn!(
                        required_mb,
                        available_mb = stats.available_mb,
                        "insufficient memory available"
                    );
                }
                ok
            }
            None => {
                tracing::debug!(required_mb, "memory stats unavailable; assuming available");
                true
            }
        }
    }

    pub fn stats(&self) -> MemoryMonitorStats {
        let stats = self.sample();
        let level = self.classify(stats.as_ref());
        let cleanups = self.cleanups();
        MemoryMonitorStats {
            total_mb: stats.map(|s| s.total_mb),
            used_mb: stats.map(|s| s.used_mb),
            available_mb: stats.map(|s| s.available_mb),
            process_mb: stats.map(|s| s.process_mb),
            used_percent: stats.map(|s| s.used_percent()),
            pressure_level: level,
            warning_percent: self.warning_percent,
            critical_percent: self.critical_percent,
            registered_cleanups: cleanups.len(),
            quarantined_cleanups: cleanups
                .iter()
                .filter(|entry| entry.quarantined)
                .map(|entry| entry.name.clone())
                .collect(),
        }
    }

    /// Spawns the background sampling loop on the current tokio runtime.
    pub fn start(self: &Arc<Self>, interval: Duration) -> MonitorHandle {
        let token = CancellationToken::new();
        let monitor = Arc::clone(self);
        let child = token.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor.check_memory_usage();
                    }
                }
            }
            tracing::debug!("memory monitor stopped");
        });
        tracing::debug!(interval_ms = interval.as_millis() as u64, "memory monitor started");
        MonitorHandle { token, task }
    }
}

/// Owns the background monitor task.
pub struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "memory monitor task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
