use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use prlens::batch::{BatchOptions, FailureReason, ItemResult};
use prlens::error::ServiceError;
use prlens::pipeline::Pipeline;

use super::pipeline_harness::{MockClassifier, test_config, work_items};

#[tokio::test]
async fn middle_failure_keeps_submission_order() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let classifier = Arc::new(
        MockClassifier::new()
            .fail_when("Change 2", ServiceError::Transient("upstream 503".into()))
            .with_delay(Duration::from_millis(5)),
    );
    let pipeline = Pipeline::from_config(&config, classifier.clone());

    let outcome = pipeline
        .coordinator
        .process_batch("prs", &work_items(3), BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 3);
    assert!(matches!(&outcome.results[0], ItemResult::Success { item_id, .. } if item_id == "acme/api#1"));
    assert!(matches!(
        &outcome.results[1],
        ItemResult::Error(err) if err.item_id == "acme/api#2" && err.reason == FailureReason::Transient
    ));
    assert!(matches!(&outcome.results[2], ItemResult::Success { item_id, .. } if item_id == "acme/api#3"));
    assert_eq!(classifier.calls(), 3);

    let limiter = pipeline.registry.limiter("classifier");
    assert_eq!(limiter.stats().service, "classifier");
}

#[tokio::test]
async fn results_follow_input_order_when_tasks_finish_out_of_order() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.batch.max_concurrency = 3;
    let classifier = Arc::new(
        MockClassifier::new()
            .delay_when("Change 1", Duration::from_millis(150))
            .delay_when("Change 2", Duration::from_millis(50))
            .fail_when("Change 2", ServiceError::Transient("upstream 503".into())),
    );
    let pipeline = Pipeline::from_config(&config, classifier.clone());

    let outcome = pipeline
        .coordinator
        .process_batch("prs", &work_items(3), BatchOptions::default())
        .await
        .unwrap();

    let order: Vec<(&str, bool)> = outcome
        .results
        .iter()
        .map(|r| (r.item_id(), r.is_success()))
        .collect();
    assert_eq!(
        order,
        [("acme/api#1", true), ("acme/api#2", false), ("acme/api#3", true)]
    );
    assert_eq!(classifier.calls(), 3);
}

#[tokio::test]
async fn repeated_failures_open_the_circuit_for_later_items() {
    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.circuit_breaker.failure_threshold = 2;
    config.batch.max_concurrency = 1;
    let classifier = Arc::new(
        MockClassifier::new().fail_when("Change", ServiceError::Transient("down".into())),
    );
    let pipeline = Pipeline::from_config(&config, classifier.clone());

    let outcome = pipeline
        .coordinator
        .process_batch("prs", &work_items(5), BatchOptions::default())
        .await
        .unwrap();

    let reasons: Vec<FailureReason> = outcome
        .results
        .iter()
        .map(|r| match r {
            ItemResult::Error(err) => err.reason,
            ItemResult::Success { .. } => panic!("no item should succeed"),
        })
        .collect();
    assert_eq!(
        reasons,
        [
            FailureReason::Transient,
            FailureReason::Transient,
            FailureReason::CircuitOpen,
            FailureReason::CircuitOpen,
            FailureReason::CircuitOpen,
        ]
    );
    assert_eq!(classifier.calls(), 2);

    let health = pipeline.health();
    assert_eq!(health.status, "degraded");
}
