use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Raw answer from a classification service, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierResponse {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ClassifierResponse {
    pub fn new(content: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            content: content.into(),
            input_tokens,
            output_tokens,
        }
    }
}

/// An external service that turns a prompt into a classification.
///
/// Implementations decide the [`ErrorKind`](crate::error::ErrorKind) of
/// every failure they return; the circuit breaker and the batch coordinator
/// act on that kind and never inspect messages.
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    fn classify<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ClassifierResponse, ServiceError>> + Send + 'a>>;
}
