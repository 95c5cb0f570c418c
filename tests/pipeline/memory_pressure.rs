use std::sync::Arc;

use tempfile::TempDir;
use tokio_test::assert_err;

use prlens::batch::BatchOptions;
use prlens::error::BatchError;
use prlens::pipeline::{Pipeline, RESULT_CACHE_CLEANUP};
use prlens::runtime::memory::{MemoryPressureMonitor, PressureLevel};

use super::pipeline_harness::{MockClassifier, ScriptedMemory, test_config, work_items};

#[tokio::test]
async fn critical_pressure_clears_the_result_cache() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let memory = ScriptedMemory::new(300);
    let monitor = Arc::new(MemoryPressureMonitor::with_source(
        &config.memory,
        Box::new(Arc::clone(&memory)),
    ));
    let pipeline =
        Pipeline::with_monitor(&config, Arc::new(MockClassifier::new()), Some(Arc::clone(&monitor)));

    pipeline
        .coordinator
        .process_batch("prs", &work_items(4), BatchOptions::default())
        .await
        .unwrap();
    assert_eq!(pipeline.cache.len(), 4);

    memory.set_used(960);
    let check = monitor.check_memory_usage();
    assert_eq!(check.level, PressureLevel::Critical);
    let cleanup = check.cleanup.unwrap();
    assert_eq!(cleanup.freed, 4);
    assert_eq!(cleanup.succeeded, vec![RESULT_CACHE_CLEANUP.to_string()]);
    assert!(pipeline.cache.is_empty());
}

#[tokio::test]
async fn preflight_rejects_oversized_batches() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.batch.required_memory_mb = 400;
    let memory = ScriptedMemory::new(800);
    let monitor = Arc::new(MemoryPressureMonitor::with_source(
        &config.memory,
        Box::new(Arc::clone(&memory)),
    ));
    let classifier = Arc::new(MockClassifier::new());
    let pipeline = Pipeline::with_monitor(&config, classifier.clone(), Some(monitor));

    let err = assert_err!(
        pipeline
            .coordinator
            .process_batch("prs", &work_items(2), BatchOptions::default())
            .await
    );

    assert!(matches!(
        err,
        BatchError::ResourceExhausted {
            required_mb: 400,
            available_mb: Some(200),
        }
    ));
    assert!(err.to_string().contains("reduce batch size"));
    assert_eq!(classifier.calls(), 0);
}

#[tokio::test]
async fn background_monitor_starts_and_stops() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.memory.monitor_enabled = true;
    config.memory.check_interval_secs = 1;
    let memory = ScriptedMemory::new(100);
    let monitor = Arc::new(MemoryPressureMonitor::with_source(
        &config.memory,
        Box::new(Arc::clone(&memory)),
    ));
    let pipeline = Pipeline::with_monitor(&config, Arc::new(MockClassifier::new()), Some(monitor));

    let handle = pipeline.start_monitor().unwrap();
    assert!(handle.is_running());
    handle.shutdown().await;

    let health = pipeline.health();
    assert_eq!(health.components["memory"].status, "ok");
}
