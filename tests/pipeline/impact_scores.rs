use std::sync::Arc;

use tempfile::TempDir;

use prlens::batch::BatchOptions;
use prlens::classify::WorkType;
use prlens::pipeline::Pipeline;
use prlens::report::BatchReport;

use super::pipeline_harness::{MockClassifier, test_config, work_items};

#[tokio::test]
async fn five_pull_requests_score_identically() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let pipeline = Pipeline::from_config(&config, Arc::new(MockClassifier::new()));

    let outcome = pipeline
        .coordinator
        .process_batch("prs", &work_items(5), BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.summary.succeeded, 5);
    for item in &outcome.results {
        let result = item.result().unwrap();
        assert_eq!(result.work_type, WorkType::Feature);
        assert!((result.impact_score() - 6.1).abs() < 1e-9);
        assert_eq!(result.token_usage.input_tokens, 120);
    }

    let report = BatchReport::from_outcome(&outcome);
    assert_eq!(report.average_impact, Some(6.1));
    let path = tmp.path().join("report.json");
    report.write_to(&path).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["rows"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn cached_items_are_reported_as_cached() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let classifier = Arc::new(MockClassifier::new());
    let pipeline = Pipeline::from_config(&config, classifier.clone());
    let forced = BatchOptions {
        max_concurrency: Some(2),
        force: true,
    };

    pipeline
        .coordinator
        .process_batch("prs", &work_items(5), forced)
        .await
        .unwrap();
    let again = pipeline
        .coordinator
        .process_batch("prs", &work_items(5), forced)
        .await
        .unwrap();

    assert_eq!(classifier.calls(), 5);
    assert_eq!(again.summary.cached, 5);
    assert_eq!(pipeline.cache.stats().hits, 5);
}
