use super::checkpoint::CheckpointStore;
use super::types::{BatchOptions, BatchOutcome, BatchSummary, FailureReason, ItemResult};
use crate::cache::ResultCache;
use crate::classify::{ClassificationResult, Classifier, WorkItem, parse_classification};
use crate::config::BatchConfig;
use crate::error::{BatchError, CallError, ServiceError};
use crate::resilience::ServiceRegistry;
use crate::runtime::memory::{MemoryPressureMonitor, PressureLevel};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::AbortOnDropHandle;

/// What a worker task hands back to the collector.
enum TaskOutcome {
    Classified(ClassificationResult),
    ParseFailed(String),
    Failed(CallError),
}

enum Slot {
    Ready(ItemResult),
    Pending {
        item_id: String,
        handle: AbortOnDropHandle<TaskOutcome>,
    },
}

/// Runs a batch of work items through the classifier with bounded
/// concurrency, consulting the result cache first and checkpointing the
/// ordered results when done.
///
/// All shared resilience state lives in the injected [`ServiceRegistry`];
/// two coordinators sharing a registry share one breaker and one limiter.
pub struct BatchCoordinator {
    classifier: Arc<dyn Classifier>,
    registry: Arc<ServiceRegistry>,
    cache: Arc<ResultCache>,
    monitor: Option<Arc<MemoryPressureMonitor>>,
    checkpoints: Option<Arc<CheckpointStore>>,
    config: BatchConfig,
    task_timeout: Duration,
}

impl BatchCoordinator {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        registry: Arc<ServiceRegistry>,
        cache: Arc<ResultCache>,
        config: BatchConfig,
    ) -> Self {
        let task_timeout = config.task_timeout();
        Self {
            classifier,
            registry,
            cache,
            monitor: None,
            checkpoints: None,
            config,
            task_timeout,
        }
    }

    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<MemoryPressureMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    #[must_use]
    pub fn with_checkpoints(mut self, store: Arc<CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Registry name of the breaker and limiter guarding the classifier.
    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Pool size actually used: the request (or configured default), capped
    /// by the hard maximum, and never zero.
    pub fn effective_concurrency(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.max_concurrency)
            .min(self.config.hard_max_concurrency)
            .max(1)
    }

    /// Classifies `items` and returns one result per item, in input order.
    ///
    /// Per-item failures become [`ItemResult::Error`] entries. The call only
    /// fails as a whole when memory runs out or the classifier reports an
    /// ignored (cancelling) error. Checkpoint write failures are logged.
    pub async fn process_batch(
        &self,
        step: &str,
        items: &[WorkItem],
        options: BatchOptions,
    ) -> Result<BatchOutcome, BatchError> {
        let run_id = format!("batch_{}", uuid::Uuid::new_v4());

        if !options.force
            && let Some(outcome) = self.resume(&run_id, step, items.len())
        {
            return Ok(outcome);
        }

        self.preflight()?;

        let concurrency = self.effective_concurrency(options.max_concurrency);
        tracing::info!(
            run_id = run_id.as_str(),
            step,
            items = items.len(),
            concurrency,
            "batch started"
        );

        let slots = self.submit(items, concurrency).await?;
        let results = Self::collect(slots).await?;
        let summary = BatchSummary::from_results(&results);

        let checkpoint = self.checkpoints.as_ref().and_then(|store| {
            match store.save(step, &results) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::error!(
                        run_id = run_id.as_str(),
                        step,
                        error = %err,
                        "failed to save checkpoint"
                    );
                    None
                }
            }
        });

        tracing::info!(
            run_id = run_id.as_str(),
            step,
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            cached = summary.cached,
            "batch finished"
        );

        Ok(BatchOutcome {
            run_id,
            step: step.to_string(),
            results,
            resumed_from_checkpoint: false,
            checkpoint,
            summary,
        })
    }

    fn resume(&self, run_id: &str, step: &str, expected: usize) -> Option<BatchOutcome> {
        let store = self.checkpoints.as_ref()?;
        let stored = match store.load_latest::<ItemResult>(step) {
            Ok(stored) => stored?,
            Err(err) => {
                tracing::warn!(step, error = %err, "checkpoint unreadable; classifying from scratch");
                return None;
            }
        };

        let results = stored.checkpoint.results;
        if results.len() != expected {
            tracing::warn!(
                step,
                checkpoint_results = results.len(),
                items = expected,
                "checkpoint size differs from the current input"
            );
        }
        tracing::info!(
            run_id,
            step,
            file = stored.record.file.as_str(),
            results = results.len(),
            "resumed from checkpoint"
        );

        let summary = BatchSummary::from_results(&results);
        Some(BatchOutcome {
            run_id: run_id.to_string(),
            step: step.to_string(),
            results,
            resumed_from_checkpoint: true,
            checkpoint: Some(stored.record),
            summary,
        })
    }

    fn preflight(&self) -> Result<(), BatchError> {
        let required_mb = self.config.required_memory_mb;
        let Some(monitor) = self.monitor.as_ref() else {
            return Ok(());
        };
        if required_mb == 0 || monitor.check_memory_available(required_mb) {
            return Ok(());
        }

        let report = monitor.force_cleanup();
        tracing::info!(freed = report.freed, required_mb, "pre-flight cleanup finished");
        if monitor.check_memory_available(required_mb) {
            return Ok(());
        }
        Err(BatchError::ResourceExhausted {
            required_mb,
            available_mb: monitor.sample().map(|s| s.available_mb),
        })
    }

    /// Critical after cleanup and one re-check.
    ///
    /// The re-check samples without running cleanup callbacks again.
    fn memory_exhausted(monitor: &MemoryPressureMonitor) -> bool {
        if monitor.check_memory_usage().level != PressureLevel::Critical {
            return false;
        }
        monitor.classify(monitor.sample().as_ref()) == PressureLevel::Critical
    }

    async fn submit(&self, items: &[WorkItem], concurrency: usize) -> Result<Vec<Slot>, BatchError> {
        let breaker = self.registry.breaker(&self.config.service_name);
        let limiter = self.registry.limiter(&self.config.service_name);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let check_every = self.config.memory_check_interval;

        let mut slots = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if let Some(monitor) = self.monitor.as_ref()
                && check_every > 0
                && index > 0
                && index % check_every == 0
                && Self::memory_exhausted(monitor)
            {
                tracing::error!(
                    submitted = index,
                    items = items.len(),
                    "memory still critical after cleanup; aborting batch"
                );
                // Dropping `slots` aborts every in-flight task.
                return Err(BatchError::ResourceExhausted {
                    required_mb: self.config.required_memory_mb,
                    available_mb: monitor.sample().map(|s| s.available_mb),
                });
            }

            if let Some(result) = self.cache.get(&item.fingerprint) {
                tracing::debug!(item_id = item.id.as_str(), "cache hit");
                slots.push(Slot::Ready(ItemResult::Success {
                    item_id: item.id.clone(),
                    result,
                    cached: true,
                }));
                continue;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                slots.push(Slot::Ready(ItemResult::error(
                    item.id.clone(),
                    FailureReason::Internal,
                    "worker pool closed",
                )));
                continue;
            };

            let classifier = Arc::clone(&self.classifier);
            let breaker = Arc::clone(&breaker);
            let limiter = Arc::clone(&limiter);
            let cache = Arc::clone(&self.cache);
            let timeout = self.task_timeout;
            let payload = item.payload.clone();
            let fingerprint = item.fingerprint.clone();
            let item_id = item.id.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                limiter.wait_if_needed().await;

                let outcome = breaker
                    .call(|| async {
                        match tokio::time::timeout(timeout, classifier.classify(&payload)).await {
                            Ok(response) => response,
                            Err(_) => Err(ServiceError::Timeout(timeout)),
                        }
                    })
                    .await;

                match outcome {
                    Ok(response) => {
                        limiter.record_success();
                        match parse_classification(&response) {
                            Ok(result) => {
                                cache.set(fingerprint, result.clone());
                                TaskOutcome::Classified(result)
                            }
                            Err(err) => {
                                tracing::warn!(item_id = item_id.as_str(), error = %err, "unparseable classification");
                                TaskOutcome::ParseFailed(err.to_string())
                            }
                        }
                    }
                    Err(err) => {
                        match &err {
                            CallError::Service(ServiceError::RateLimited { .. }) => {
                                limiter.record_failure(true);
                            }
                            CallError::Service(ServiceError::Transient(_) | ServiceError::Timeout(_)) => {
                                limiter.record_failure(false);
                            }
                            _ => {}
                        }
                        tracing::debug!(item_id = item_id.as_str(), error = %err, "classification failed");
                        TaskOutcome::Failed(err)
                    }
                }
            });

            slots.push(Slot::Pending {
                item_id: item.id.clone(),
                handle: AbortOnDropHandle::new(handle),
            });
        }
        Ok(slots)
    }

    async fn collect(slots: Vec<Slot>) -> Result<Vec<ItemResult>, BatchError> {
        let mut results = Vec::with_capacity(slots.len());
        for slot in slots {
            let (item_id, handle) = match slot {
                Slot::Ready(result) => {
                    results.push(result);
                    continue;
                }
                Slot::Pending { item_id, handle } => (item_id, handle),
            };

            let result = match handle.await {
                Ok(TaskOutcome::Classified(result)) => ItemResult::Success {
                    item_id,
                    result,
                    cached: false,
                },
                Ok(TaskOutcome::ParseFailed(message)) => {
                    ItemResult::error(item_id, FailureReason::ParseError, message)
                }
                Ok(TaskOutcome::Failed(err)) => match FailureReason::from_call_error(&err) {
                    Some(reason) => ItemResult::error(item_id, reason, err.to_string()),
                    None => {
                        tracing::warn!(item_id = item_id.as_str(), error = %err, "batch cancelled");
                        // Remaining handles are aborted when the iterator drops.
                        return Err(BatchError::Cancelled {
                            item_id,
                            message: err.to_string(),
                        });
                    }
                },
                Err(join_err) => {
                    tracing::error!(item_id = item_id.as_str(), error = %join_err, "worker task failed");
                    ItemResult::error(item_id, FailureReason::Internal, join_err.to_string())
                }
            };
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifierResponse;
    use crate::config::{CircuitBreakerConfig, MemoryConfig, RateLimitConfig};
    use crate::runtime::memory::{MemoryStats, MemoryStatsSource};
    use std::collections::{BTreeMap, HashMap};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tempfile::TempDir;

    const GOOD: &str = r#"{"work_type":"feature","complexity_score":7,"risk_score":5,"clarity_score":8,"summary":"ok"}"#;

    #[derive(Clone)]
    enum Reply {
        Content(&'static str),
        Fail(ServiceError),
        Hang,
    }

    /// Replies by payload; unknown payloads get a valid classification.
    #[derive(Default)]
    struct ScriptedClassifier {
        replies: HashMap<String, Reply>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedClassifier {
        fn reply(mut self, payload: &str, reply: Reply) -> Self {
            self.replies.insert(payload.to_string(), reply);
            self
        }
    }

    impl Classifier for ScriptedClassifier {
        fn name(&self) -> &str {
            "scripted"
        }

        fn classify<'a>(
            &'a self,
            prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<ClassifierResponse, ServiceError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let reply = self
                    .replies
                    .get(prompt)
                    .cloned()
                    .unwrap_or(Reply::Content(GOOD));
                let result = match reply {
                    Reply::Content(content) => Ok(ClassifierResponse::new(content, 10, 5)),
                    Reply::Fail(err) => Err(err),
                    Reply::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(ClassifierResponse::new(GOOD, 0, 0))
                    }
                };
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            })
        }
    }

    fn unpaced_registry() -> Arc<ServiceRegistry> {
        let unpaced = RateLimitConfig {
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
            ..RateLimitConfig::default()
        };
        let mut limits = BTreeMap::new();
        limits.insert("classifier".to_string(), unpaced);
        Arc::new(ServiceRegistry::new(CircuitBreakerConfig::default(), limits))
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("acme/api#{i}"), format!("pr-{i}"), format!("fp-{i}")))
            .collect()
    }

    fn coordinator(classifier: ScriptedClassifier) -> (BatchCoordinator, Arc<ScriptedClassifier>) {
        let classifier = Arc::new(classifier);
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60), 100));
        let coordinator = BatchCoordinator::new(
            Arc::clone(&classifier) as Arc<dyn Classifier>,
            unpaced_registry(),
            cache,
            BatchConfig::default(),
        );
        (coordinator, classifier)
    }

    #[tokio::test]
    async fn results_follow_input_order_with_per_item_errors() {
        let (coordinator, _) = coordinator(
            ScriptedClassifier::default()
                .reply("pr-1", Reply::Fail(ServiceError::Fatal("bad request".into()))),
        );
        let outcome = coordinator
            .process_batch("prs", &items(3), BatchOptions::default())
            .await
            .unwrap();

        let ids: Vec<_> = outcome.results.iter().map(ItemResult::item_id).collect();
        assert_eq!(ids, ["acme/api#0", "acme/api#1", "acme/api#2"]);
        assert!(outcome.results[0].is_success());
        assert!(matches!(
            &outcome.results[1],
            ItemResult::Error(err) if err.reason == FailureReason::Fatal
        ));
        assert!(outcome.results[2].is_success());
        assert_eq!(outcome.summary.failed, 1);
        assert!(outcome.run_id.starts_with("batch_"));
    }

    #[tokio::test]
    async fn unparseable_output_is_a_parse_error() {
        let (coordinator, _) =
            coordinator(ScriptedClassifier::default().reply("pr-0", Reply::Content("no idea")));
        let outcome = coordinator
            .process_batch("prs", &items(1), BatchOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            &outcome.results[0],
            ItemResult::Error(err) if err.reason == FailureReason::ParseError
        ));
    }

    #[tokio::test]
    async fn cache_hits_skip_the_classifier() {
        let (coordinator, classifier) = coordinator(ScriptedClassifier::default());
        let batch = items(2);
        coordinator
            .process_batch("prs", &batch, BatchOptions::default())
            .await
            .unwrap();
        let second = coordinator
            .process_batch("prs", &batch, BatchOptions::default())
            .await
            .unwrap();

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.summary.cached, 2);
        assert!(second.results.iter().all(|r| matches!(r, ItemResult::Success { cached: true, .. })));
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_hard_max() {
        let (mut coordinator, classifier) = coordinator(ScriptedClassifier {
            delay: Duration::from_millis(20),
            ..ScriptedClassifier::default()
        });
        coordinator.config.hard_max_concurrency = 2;
        assert_eq!(coordinator.effective_concurrency(Some(50)), 2);
        assert_eq!(coordinator.effective_concurrency(Some(0)), 1);

        let outcome = coordinator
            .process_batch(
                "prs",
                &items(6),
                BatchOptions {
                    max_concurrency: Some(50),
                    force: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.summary.succeeded, 6);
        assert!(classifier.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let (coordinator, _) =
            coordinator(ScriptedClassifier::default().reply("pr-0", Reply::Hang));
        let coordinator = coordinator.with_task_timeout(Duration::from_millis(30));
        let outcome = coordinator
            .process_batch("prs", &items(2), BatchOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            &outcome.results[0],
            ItemResult::Error(err) if err.reason == FailureReason::Timeout
        ));
        assert!(outcome.results[1].is_success());
    }

    #[tokio::test]
    async fn open_circuit_fails_fast() {
        let (coordinator, classifier) = coordinator(ScriptedClassifier::default());
        let breaker = coordinator.registry.breaker("classifier");
        for _ in 0..5 {
            let _ = breaker
                .call(|| async { Err::<(), _>(ServiceError::Transient("down".into())) })
                .await;
        }

        let outcome = coordinator
            .process_batch("prs", &items(2), BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert!(outcome.results.iter().all(|r| matches!(
            r,
            ItemResult::Error(err) if err.reason == FailureReason::CircuitOpen
        )));
    }

    #[tokio::test]
    async fn ignored_error_cancels_the_batch() {
        let (coordinator, _) = coordinator(
            ScriptedClassifier::default()
                .reply("pr-1", Reply::Fail(ServiceError::Ignored("operator abort".into()))),
        );
        let err = coordinator
            .process_batch("prs", &items(3), BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::Cancelled { item_id, .. } if item_id == "acme/api#1"));
    }

    #[tokio::test]
    async fn checkpoint_is_written_and_resumed() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(CheckpointStore::new(tmp.path()));
        let (coordinator, classifier) = coordinator(ScriptedClassifier::default());
        let coordinator = coordinator.with_checkpoints(Arc::clone(&store));
        let batch = items(2);

        let first = coordinator
            .process_batch("prs", &batch, BatchOptions::default())
            .await
            .unwrap();
        assert!(first.checkpoint.is_some());
        assert!(!first.resumed_from_checkpoint);

        coordinator.cache.clear();
        let resumed = coordinator
            .process_batch("prs", &batch, BatchOptions::default())
            .await
            .unwrap();
        assert!(resumed.resumed_from_checkpoint);
        assert_eq!(resumed.results, first.results);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);

        let forced = coordinator
            .process_batch(
                "prs",
                &batch,
                BatchOptions {
                    max_concurrency: None,
                    force: true,
                },
            )
            .await
            .unwrap();
        assert!(!forced.resumed_from_checkpoint);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 4);
        assert_eq!(store.history("prs").unwrap().len(), 2);
    }

    struct FixedMemory {
        used_mb: AtomicU64,
    }

    impl MemoryStatsSource for FixedMemory {
        fn name(&self) -> &str {
            "fixed"
        }
        fn sample(&self) -> Option<MemoryStats> {
            let used = self.used_mb.load(Ordering::SeqCst);
            Some(MemoryStats {
                total_mb: 1000,
                used_mb: used,
                available_mb: 1000 - used,
                process_mb: 50,
            })
        }
    }

    #[tokio::test]
    async fn preflight_rejects_when_memory_is_short() {
        let memory = Arc::new(FixedMemory {
            used_mb: AtomicU64::new(900),
        });
        let monitor = Arc::new(MemoryPressureMonitor::with_source(
            &MemoryConfig::default(),
            Box::new(Arc::clone(&memory)),
        ));
        let (mut coordinator, classifier) = coordinator(ScriptedClassifier::default());
        coordinator.config.required_memory_mb = 500;
        let coordinator = coordinator.with_monitor(monitor);

        let err = coordinator
            .process_batch("prs", &items(2), BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BatchError::ResourceExhausted {
                required_mb: 500,
                available_mb: Some(100),
            }
        ));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn critical_pressure_clears_cache_and_continues_when_relieved() {
        let memory = Arc::new(FixedMemory {
            used_mb: AtomicU64::new(500),
        });
        let monitor = Arc::new(MemoryPressureMonitor::with_source(
            &MemoryConfig::default(),
            Box::new(Arc::clone(&memory)),
        ));
        let (mut coordinator, _) = coordinator(ScriptedClassifier::default());
        coordinator.config.memory_check_interval = 2;
        let coordinator = coordinator.with_monitor(Arc::clone(&monitor));
        coordinator.cache.register_with(&monitor, "results");
        coordinator.cache.set("stale", {
            let response = ClassifierResponse::new(GOOD, 0, 0);
            parse_classification(&response).unwrap()
        });

        // Cleanup frees memory on the first critical sample.
        let relief = Arc::clone(&memory);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        monitor.register_cleanup("relief", move || {
            relief.used_mb.store(500, Ordering::SeqCst);
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });
        memory.used_mb.store(950, Ordering::SeqCst);

        let outcome = coordinator
            .process_batch("prs", &items(3), BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.summary.succeeded, 3);
        // One periodic check at item 2, one cleanup pass.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(coordinator.cache.get("stale").is_none());
    }

    #[tokio::test]
    async fn sustained_critical_pressure_aborts() {
        let memory = Arc::new(FixedMemory {
            used_mb: AtomicU64::new(990),
        });
        let monitor = Arc::new(MemoryPressureMonitor::with_source(
            &MemoryConfig::default(),
            Box::new(Arc::clone(&memory)),
        ));
        let (mut coordinator, _) = coordinator(ScriptedClassifier::default());
        coordinator.config.memory_check_interval = 1;
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        monitor.register_cleanup("noop", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });
        let coordinator = coordinator.with_monitor(monitor);

        let err = coordinator
            .process_batch("prs", &items(3), BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::ResourceExhausted { .. }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
