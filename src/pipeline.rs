//! Wires the resilience components, cache, memory monitor and checkpoint
//! store around one classifier.

use crate::batch::{BatchCoordinator, CheckpointStore};
use crate::cache::ResultCache;
use crate::classify::Classifier;
use crate::config::Config;
use crate::diagnostics::health::HealthReport;
use crate::resilience::ServiceRegistry;
use crate::runtime::memory::{MemoryPressureMonitor, MonitorHandle};
use std::sync::Arc;
use std::time::Duration;

/// Cleanup name under which the result cache is registered with the monitor.
pub const RESULT_CACHE_CLEANUP: &str = "result_cache";

pub struct Pipeline {
    pub registry: Arc<ServiceRegistry>,
    pub cache: Arc<ResultCache>,
    pub monitor: Option<Arc<MemoryPressureMonitor>>,
    pub checkpoints: Arc<CheckpointStore>,
    pub coordinator: BatchCoordinator,
    check_interval: Duration,
}

impl Pipeline {
    pub fn from_config(config: &Config, classifier: Arc<dyn Classifier>) -> Self {
        let monitor = config
            .memory
            .monitor_enabled
            .then(|| Arc::new(MemoryPressureMonitor::new(&config.memory)));
        Self::with_monitor(config, classifier, monitor)
    }

    /// Like [`from_config`](Self::from_config) with a caller-supplied monitor.
    pub fn with_monitor(
        config: &Config,
        classifier: Arc<dyn Classifier>,
        monitor: Option<Arc<MemoryPressureMonitor>>,
    ) -> Self {
        let registry = Arc::new(ServiceRegistry::from_config(config));
        let cache = Arc::new(ResultCache::new(config.cache.ttl(), config.cache.max_entries));
        let checkpoints = Arc::new(CheckpointStore::new(config.checkpoint_dir()));

        let mut coordinator = BatchCoordinator::new(
            classifier,
            Arc::clone(&registry),
            Arc::clone(&cache),
            config.batch.clone(),
        )
        .with_checkpoints(Arc::clone(&checkpoints));

        if let Some(monitor) = &monitor {
            cache.register_with(monitor, RESULT_CACHE_CLEANUP);
            coordinator = coordinator.with_monitor(Arc::clone(monitor));
        }

        Self {
            registry,
            cache,
            monitor,
            checkpoints,
            coordinator,
            check_interval: config.memory.check_interval(),
        }
    }

    /// Starts periodic memory checks; `None` when monitoring is disabled.
    pub fn start_monitor(&self) -> Option<MonitorHandle> {
        self.monitor
            .as_ref()
            .map(|monitor| monitor.start(self.check_interval))
    }

    pub fn health(&self) -> HealthReport {
        // The classifier's pair shows up even before the first call.
        let service = self.coordinator.service_name();
        self.registry.breaker(service);
        self.registry.limiter(service);
        HealthReport::collect(&self.registry, &self.cache, self.monitor.as_deref())
    }
}
