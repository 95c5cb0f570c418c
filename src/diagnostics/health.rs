use crate::cache::{CacheStats, ResultCache};
use crate::resilience::{BreakerStats, CircuitState, RateLimiterStats, ServiceRegistry};
use crate::runtime::memory::{MemoryMonitorStats, MemoryPressureMonitor, PressureLevel};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;

const PROCESS_LOCAL_NOTE: &str = "breaker, limiter and cache counters cover this process only; \
a standalone health command starts from fresh instances";

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn ok() -> Self {
        Self {
            status: "ok".into(),
            detail: None,
        }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: "degraded".into(),
            detail: Some(detail.into()),
        }
    }
}

/// Point-in-time view of every resilience component.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub pid: u32,
    pub generated_at: String,
    /// `ok` when every component is ok, otherwise `degraded`.
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
    pub breakers: Vec<BreakerStats>,
    pub limiters: Vec<RateLimiterStats>,
    pub cache: CacheStats,
    pub memory: Option<MemoryMonitorStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

fn breaker_health(stats: &BreakerStats) -> ComponentHealth {
    match stats.state {
        CircuitState::Closed => ComponentHealth::ok(),
        CircuitState::Open => ComponentHealth::degraded(format!(
            "circuit open; retry in up to {:.0}s",
            stats.recovery_timeout_secs
        )),
        CircuitState::HalfOpen => ComponentHealth::degraded("circuit half-open; probing"),
    }
}

fn memory_health(stats: &MemoryMonitorStats) -> ComponentHealth {
    match stats.pressure_level {
        PressureLevel::Normal => ComponentHealth::ok(),
        PressureLevel::Unknown => ComponentHealth {
            status: "unknown".into(),
            detail: Some("memory statistics unavailable".into()),
        },
        level => ComponentHealth::degraded(format!(
            "{level} pressure at {:.1}% used",
            stats.used_percent.unwrap_or_default()
        )),
    }
}

impl HealthReport {
    pub fn collect(
        registry: &ServiceRegistry,
        cache: &ResultCache,
        monitor: Option<&MemoryPressureMonitor>,
    ) -> Self {
        let breakers = registry.breaker_stats();
        let limiters = registry.limiter_stats();
        let cache = cache.stats();
        let memory = monitor.map(MemoryPressureMonitor::stats);

        let mut components = BTreeMap::new();
        for stats in &breakers {
            components.insert(format!("breaker:{}", stats.service), breaker_health(stats));
        }
        components.insert("cache".to_string(), ComponentHealth::ok());
        if let Some(stats) = &memory {
            components.insert("memory".to_string(), memory_health(stats));
        }

        let status = if components.values().any(|c| c.status == "degraded") {
            "degraded"
        } else {
            "ok"
        };

        Self {
            pid: std::process::id(),
            generated_at: Utc::now().to_rfc3339(),
            status: status.into(),
            components,
            breakers,
            limiters,
            cache,
            memory,
            note: None,
        }
    }

    /// Marks the in-memory counters as local to the reporting process.
    pub fn process_local(mut self) -> Self {
        self.note = Some(PROCESS_LOCAL_NOTE.to_string());
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "status": "error",
                "message": "failed to serialize health report"
            })
        })
    }
}
