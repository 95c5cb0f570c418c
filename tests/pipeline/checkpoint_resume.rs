use std::sync::Arc;

use tempfile::TempDir;
use tokio_test::assert_ok;

use prlens::batch::BatchOptions;
use prlens::pipeline::Pipeline;

use super::pipeline_harness::{MockClassifier, test_config, work_items};

#[tokio::test]
async fn second_run_resumes_without_classifying() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let items = work_items(3);

    let first_classifier = Arc::new(MockClassifier::new());
    let first = Pipeline::from_config(&config, first_classifier.clone())
        .coordinator
        .process_batch("prs", &items, BatchOptions::default())
        .await
        .unwrap();
    assert_eq!(first_classifier.calls(), 3);
    let saved = first.checkpoint.clone().unwrap();

    // A fresh pipeline has an empty cache; only the checkpoint survives.
    let second_classifier = Arc::new(MockClassifier::new());
    let second = Pipeline::from_config(&config, second_classifier.clone())
        .coordinator
        .process_batch("prs", &items, BatchOptions::default())
        .await
        .unwrap();

    assert_eq!(second_classifier.calls(), 0);
    assert!(second.resumed_from_checkpoint);
    assert_eq!(second.checkpoint, Some(saved));
    assert_eq!(second.results, first.results);
}

#[tokio::test]
async fn prune_keeps_latest_checkpoints_per_step() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path());
    let pipeline = Pipeline::from_config(&config, Arc::new(MockClassifier::new()));
    let forced = BatchOptions {
        max_concurrency: None,
        force: true,
    };

    for _ in 0..4 {
        pipeline
            .coordinator
            .process_batch("prs", &work_items(1), forced)
            .await
            .unwrap();
    }
    pipeline
        .coordinator
        .process_batch("commits", &work_items(1), forced)
        .await
        .unwrap();

    assert_eq!(assert_ok!(pipeline.checkpoints.history("prs")).len(), 4);
    assert_eq!(assert_ok!(pipeline.checkpoints.prune_all(2)), 2);
    assert_eq!(assert_ok!(pipeline.checkpoints.history("prs")).len(), 2);
    assert_eq!(assert_ok!(pipeline.checkpoints.history("commits")).len(), 1);

    let manifest = assert_ok!(pipeline.checkpoints.manifest());
    for history in manifest.steps.values() {
        for record in history {
            assert!(pipeline.checkpoints.dir().join(&record.file).exists());
        }
    }
}
