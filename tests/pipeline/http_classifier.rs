use std::sync::Arc;

use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use prlens::batch::{BatchOptions, FailureReason, ItemResult};
use prlens::classify::OpenAiCompatibleClassifier;
use prlens::pipeline::Pipeline;

use super::pipeline_harness::{FEATURE_JSON, test_config, work_items};

fn completion(content: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 200, "completion_tokens": 40}
    })
}

#[tokio::test]
async fn http_errors_become_per_item_reasons() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Change 2"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "1")
                .set_body_string(r#"{"error":{"message":"slow down"}}"#),
        )
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("Change 3"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(FEATURE_JSON)))
        .with_priority(5)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let mut config = test_config(tmp.path());
    config.classifier.base_url = server.uri();
    config.classifier.api_key = Some("sk-test".into());
    let classifier = Arc::new(OpenAiCompatibleClassifier::from_config(&config.classifier));
    let pipeline = Pipeline::from_config(&config, classifier);

    let outcome = pipeline
        .coordinator
        .process_batch(
            "prs",
            &work_items(3),
            BatchOptions {
                max_concurrency: Some(1),
                force: false,
            },
        )
        .await
        .unwrap();

    let first = outcome.results[0].result().unwrap();
    assert_eq!(first.token_usage.input_tokens, 200);
    assert!(matches!(
        &outcome.results[1],
        ItemResult::Error(err) if err.reason == FailureReason::RateLimited
    ));
    assert!(matches!(
        &outcome.results[2],
        ItemResult::Error(err) if err.reason == FailureReason::Fatal
    ));

    // Rate limiting slows the limiter; fatal errors leave the breaker closed.
    let limiter = pipeline.registry.limiter("classifier").stats();
    assert_eq!(limiter.consecutive_failures, 1);
    let breaker = pipeline.registry.breaker("classifier").stats();
    assert_eq!(breaker.failed_calls, 1);
    assert_eq!(breaker.successful_calls, 1);
}
