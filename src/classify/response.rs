use super::traits::ClassifierResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum WorkType {
    Feature,
    #[strum(to_string = "bugfix", serialize = "bug_fix", serialize = "fix", serialize = "bug")]
    Bugfix,
    Refactor,
    #[strum(to_string = "docs", serialize = "documentation")]
    Docs,
    #[strum(to_string = "test", serialize = "tests")]
    Test,
    Chore,
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Scores are on a 1..=10 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub work_type: WorkType,
    pub complexity_score: u8,
    pub risk_score: u8,
    pub clarity_score: u8,
    pub summary: String,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

impl ClassificationResult {
    /// `0.4·complexity + 0.5·risk + 0.1·clarity`, rounded to two decimals.
    pub fn impact_score(&self) -> f64 {
        let raw = 0.4 * f64::from(self.complexity_score)
            + 0.5 * f64::from(self.risk_score)
            + 0.1 * f64::from(self.clarity_score);
        (raw * 100.0).round() / 100.0
    }
}

#[derive(Debug, Error)]
pub enum ResponseParseError {
    #[error("no JSON object found in classifier output")]
    NoJson,

    #[error("invalid classifier JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("classifier output missing `{0}`")]
    MissingField(&'static str),
}

/// Pulls the JSON object out of model output that may be fenced or wrapped in prose.
fn extract_json(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn score(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<u8> {
    let value = keys.iter().find_map(|key| object.get(*key))?;
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !number.is_finite() {
        return None;
    }
    Some(number.round().clamp(1.0, 10.0) as u8)
}

/// Parses classifier output into a result; scores are clamped to 1..=10.
pub fn parse_classification(
    response: &ClassifierResponse,
) -> Result<ClassificationResult, ResponseParseError> {
    let json = extract_json(&response.content).ok_or(ResponseParseError::NoJson)?;
    let value: Value = serde_json::from_str(json)?;
    let object = value.as_object().ok_or(ResponseParseError::NoJson)?;

    let work_type = object
        .get("work_type")
        .or_else(|| object.get("type"))
        .and_then(Value::as_str)
        .map_or(WorkType::Other, |raw| {
            WorkType::from_str(raw.trim()).unwrap_or(WorkType::Other)
        });

    let complexity_score = score(object, &["complexity_score", "complexity"])
        .ok_or(ResponseParseError::MissingField("complexity_score"))?;
    let risk_score =
        score(object, &["risk_score", "risk"]).ok_or(ResponseParseError::MissingField("risk_score"))?;
    let clarity_score = score(object, &["clarity_score", "clarity"])
        .ok_or(ResponseParseError::MissingField("clarity_score"))?;
    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(ClassificationResult {
        work_type,
        complexity_score,
        risk_score,
        clarity_score,
        summary,
        token_usage: TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        },
    })
}
