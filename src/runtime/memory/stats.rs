use serde::Serialize;
use std::sync::{Arc, Mutex};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One memory sample, in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub total_mb: u64,
    pub used_mb: u64,
    pub available_mb: u64,
    /// Resident set size of this process.
    pub process_mb: u64,
}

impl MemoryStats {
    pub fn used_percent(&self) -> f64 {
        if self.total_mb == 0 {
            return 0.0;
        }
        self.used_mb as f64 / self.total_mb as f64 * 100.0
    }
}

/// Something that can report system and process memory usage.
pub trait MemoryStatsSource: Send + Sync {
    fn name(&self) -> &str;

    /// `None` when the source cannot produce a sample on this platform.
    fn sample(&self) -> Option<MemoryStats>;
}

impl<S: MemoryStatsSource + ?Sized> MemoryStatsSource for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn sample(&self) -> Option<MemoryStats> {
        (**self).sample()
    }
}

/// Primary source backed by the `sysinfo` crate.
pub struct SysinfoSource {
    system: Mutex<sysinfo::System>,
    pid: Option<sysinfo::Pid>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl MemoryStatsSource for SysinfoSource {
    fn name(&self) -> &str {
        "sysinfo"
    }

    fn sample(&self) -> Option<MemoryStats> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        let available = system.available_memory();
        let process = self
            .pid
            .and_then(|pid| {
                system.refresh_process(pid);
                system.process(pid).map(sysinfo::Process::memory)
            })
            .unwrap_or(0);

        Some(MemoryStats {
            total_mb: total / BYTES_PER_MB,
            used_mb: total.saturating_sub(available) / BYTES_PER_MB,
            available_mb: available / BYTES_PER_MB,
            process_mb: process / BYTES_PER_MB,
        })
    }
}

/// Fallback that reads `/proc/meminfo` and `/proc/self/status` directly.
pub struct ProcMeminfoSource;

impl ProcMeminfoSource {
    /// Parses `MemTotal` and `MemAvailable` (kB) out of a meminfo dump.
    /// Older kernels without `MemAvailable` use `MemFree + Buffers + Cached`.
    pub(crate) fn parse_meminfo(contents: &str) -> Option<(u64, u64)> {
        let mut total = None;
        let mut available = None;
        let mut free = 0u64;
        let mut buffers = 0u64;
        let mut cached = 0u64;

        for line in contents.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let Ok(kb) = value.parse::<u64>() else {
                continue;
            };
            match key {
                "MemTotal:" => total = Some(kb),
                "MemAvailable:" => available = Some(kb),
                "MemFree:" => free = kb,
                "Buffers:" => buffers = kb,
                "Cached:" => cached = kb,
                _ => {}
            }
        }

        let total = total.filter(|t| *t > 0)?;
        let available = available.unwrap_or(free + buffers + cached).min(total);
        Some((total, available))
    }

    pub(crate) fn parse_vm_rss(status: &str) -> Option<u64> {
        status.lines().find_map(|line| {
            line.trim_start()
                .strip_prefix("VmRSS:")
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|kb| kb.parse::<u64>().ok())
        })
    }
}

impl MemoryStatsSource for ProcMeminfoSource {
    fn name(&self) -> &str {
        "proc_meminfo"
    }

    fn sample(&self) -> Option<MemoryStats> {
        let meminfo = match std::fs::read_to_string("/proc/meminfo") {
            Ok(contents) => contents,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(error = %err, "failed to read /proc/meminfo");
                }
                return None;
            }
        };
        let (total_kb, available_kb) = Self::parse_meminfo(&meminfo)?;
        let rss_kb = std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| Self::parse_vm_rss(&status))
            .unwrap_or(0);

        Some(MemoryStats {
            total_mb: total_kb / 1024,
            used_mb: total_kb.saturating_sub(available_kb) / 1024,
            available_mb: available_kb / 1024,
            process_mb: rss_kb / 1024,
        })
    }
}

/// Tries each source in order and returns the first sample produced.
pub struct FallbackSource {
    sources: Vec<Box<dyn MemoryStatsSource>>,
}

impl FallbackSource {
    pub fn new(sources: Vec<Box<dyn MemoryStatsSource>>) -> Self {
        Self { sources }
    }

    /// `sysinfo` first, then `/proc/meminfo`.
    pub fn system_default() -> Self {
        Self::new(vec![
            Box::new(SysinfoSource::new()),
            Box::new(ProcMeminfoSource),
        ])
    }
}

impl MemoryStatsSource for FallbackSource {
    fn name(&self) -> &str {
        "fallback"
    }

    fn sample(&self) -> Option<MemoryStats> {
        self.sources.iter().find_map(|source| {
            let sample = source.sample();
            if sample.is_none() {
                tracing::trace!(source = source.name(), "memory source unavailable");
            }
            sample
        })
    }
}
