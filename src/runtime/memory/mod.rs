//! Memory pressure detection and relief.

pub mod monitor;
pub mod stats;

pub use monitor::{
    CleanupId, CleanupReport, MemoryCheck, MemoryMonitorStats, MemoryPressureMonitor,
    MonitorHandle, PressureLevel,
};
pub use stats::{FallbackSource, MemoryStats, MemoryStatsSource, ProcMeminfoSource, SysinfoSource};
