//! Classifier backed by any OpenAI-compatible `/chat/completions` endpoint.

use super::prompt::DEFAULT_SYSTEM_PROMPT;
use super::scrub::sanitize_api_error;
use super::traits::{Classifier, ClassifierResponse};
use crate::config::ClassifierConfig;
use crate::error::ServiceError;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub struct OpenAiCompatibleClassifier {
    name: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    system_prompt: String,
    request_timeout: Duration,
    /// Pre-computed chat completions URL.
    chat_url: String,
    client: Client,
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn is_quota_exhausted(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("insufficient_quota")
        || lower.contains("exceeded your current quota")
        || lower.contains("billing")
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Maps an unsuccessful HTTP status to a failure kind.
///
/// 429 is a rate limit unless the body says the quota is gone; 408 and 5xx
/// are transient; every other 4xx is fatal.
fn classify_status(
    name: &str,
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> ServiceError {
    let sanitized = sanitize_api_error(body);
    let message = format!("{name} API error ({}): {sanitized}", status.as_u16());

    if is_quota_exhausted(body) {
        return ServiceError::Fatal(message);
    }
    match status.as_u16() {
        429 => ServiceError::RateLimited {
            message,
            retry_after,
        },
        408 => ServiceError::Transient(message),
        _ if status.is_server_error() => ServiceError::Transient(message),
        _ => ServiceError::Fatal(message),
    }
}

impl OpenAiCompatibleClassifier {
    pub fn new(
        name: &str,
        base_url: &str,
        api_key: Option<&str>,
        model: &str,
        temperature: f64,
        request_timeout: Duration,
    ) -> Self {
        let base_url = base_url.trim_end_matches('/');
        let chat_url = if base_url.contains("chat/completions") {
            base_url.to_string()
        } else {
            format!("{base_url}/chat/completions")
        };

        Self {
            name: name.to_string(),
            api_key: api_key
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(ToString::to_string),
            model: model.to_string(),
            temperature,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            request_timeout,
            chat_url,
            client: build_client(request_timeout),
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        let classifier = Self::new(
            "classifier",
            &config.base_url,
            config.api_key.as_deref(),
            &config.model,
            config.temperature,
            Duration::from_secs(config.request_timeout_secs),
        );
        match &config.system_prompt {
            Some(prompt) => classifier.with_system_prompt(prompt),
            None => classifier,
        }
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    fn chat_completions_url(&self) -> &str {
        &self.chat_url
    }

    async fn send(&self, prompt: &str) -> Result<ClassifierResponse, ServiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ServiceError::Fatal(format!(
                "{} API key not set. Set classifier.api_key or PRLENS_API_KEY.",
                self.name
            )));
        };

        let request = ChatRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: &self.system_prompt,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(self.chat_completions_url())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ServiceError::Timeout(self.request_timeout)
                } else {
                    ServiceError::Transient(format!(
                        "{} request failed: {}",
                        self.name,
                        sanitize_api_error(&err.to_string())
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(&self.name, status, &body, retry_after);
            tracing::debug!(
                classifier = self.name.as_str(),
                status = status.as_u16(),
                kind = %err.kind(),
                "classification request rejected"
            );
            return Err(err);
        }

        let chat: ChatResponse = response.json().await.map_err(|err| {
            ServiceError::Transient(format!("{} response decode failed: {err}", self.name))
        })?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ServiceError::Transient(format!("No response from {}", self.name)))?;
        let (input_tokens, output_tokens) = chat
            .usage
            .map_or((0, 0), |usage| (usage.prompt_tokens, usage.completion_tokens));

        Ok(ClassifierResponse::new(content, input_tokens, output_tokens))
    }
}

impl Classifier for OpenAiCompatibleClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn classify<'a>(
        &'a self,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ClassifierResponse, ServiceError>> + Send + 'a>> {
        Box::pin(self.send(prompt))
    }
}
