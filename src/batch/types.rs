use super::checkpoint::CheckpointRecord;
use crate::classify::ClassificationResult;
use crate::error::{CallError, ServiceError};
use serde::{Deserialize, Serialize};

/// Coarse cause of a per-item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    Transient,
    RateLimited,
    Fatal,
    CircuitOpen,
    ParseError,
    /// The worker task panicked or was lost.
    Internal,
}

impl FailureReason {
    /// `None` for ignored errors, which abort the batch instead of becoming a result.
    pub fn from_call_error(err: &CallError) -> Option<Self> {
        match err {
            CallError::Open(_) => Some(Self::CircuitOpen),
            CallError::Service(service) => Some(match service {
                ServiceError::Timeout(_) => Self::Timeout,
                ServiceError::Transient(_) => Self::Transient,
                ServiceError::RateLimited { .. } => Self::RateLimited,
                ServiceError::Fatal(_) => Self::Fatal,
                ServiceError::Ignored(_) => return None,
            }),
            CallError::Ignored(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub item_id: String,
    pub reason: FailureReason,
    #[serde(default)]
    pub message: String,
}

/// Outcome for one input item. A batch yields exactly one per item, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemResult {
    Success {
        item_id: String,
        result: ClassificationResult,
        cached: bool,
    },
    Error(ErrorResult),
}

impl ItemResult {
    pub fn error(item_id: impl Into<String>, reason: FailureReason, message: impl Into<String>) -> Self {
        Self::Error(ErrorResult {
            item_id: item_id.into(),
            reason,
            message: message.into(),
        })
    }

    pub fn item_id(&self) -> &str {
        match self {
            Self::Success { item_id, .. } => item_id,
            Self::Error(err) => &err.item_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn result(&self) -> Option<&ClassificationResult> {
        match self {
            Self::Success { result, .. } => Some(result),
            Self::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Requested pool size; the configured default when `None`.
    pub max_concurrency: Option<usize>,
    /// Classify again even when a checkpoint exists for the step.
    pub force: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cached: usize,
}

impl BatchSummary {
    pub fn from_results(results: &[ItemResult]) -> Self {
        results.iter().fold(
            Self {
                total: results.len(),
                ..Self::default()
            },
            |mut summary, item| {
                match item {
                    ItemResult::Success { cached, .. } => {
                        summary.succeeded += 1;
                        if *cached {
                            summary.cached += 1;
                        }
                    }
                    ItemResult::Error(_) => summary.failed += 1,
                }
                summary
            },
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub run_id: String,
    pub step: String,
    pub results: Vec<ItemResult>,
    pub resumed_from_checkpoint: bool,
    /// The checkpoint written for this run, or the one resumed from.
    pub checkpoint: Option<CheckpointRecord>,
    pub summary: BatchSummary,
}
