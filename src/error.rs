use std::time::Duration;
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `prlens`.
///
/// Each subsystem defines its own error enum. Library callers can match on
/// these to decide recovery strategy; config loading and the CLI keep using
/// `anyhow::Result` for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum LensError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── Classification service ──────────────────────────────────────────
    #[error("service: {0}")]
    Service(#[from] ServiceError),

    // ── Checkpoints ─────────────────────────────────────────────────────
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),

    // ── Batch coordination ──────────────────────────────────────────────
    #[error("batch: {0}")]
    Batch(#[from] BatchError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Classification service errors ──────────────────────────────────────────

/// Coarse failure class decided by the classifier implementation before the
/// error reaches the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Network error, 5xx, timeout. Counted by the breaker and the limiter.
    Transient,
    /// Explicit rate-limit rejection. Counted, with the limiter's aggressive factor.
    RateLimited,
    /// Operator-initiated abort. Never touches breaker state.
    Ignored,
    /// Non-retryable client error (bad request, auth, exhausted quota).
    Fatal,
}

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("non-retryable failure: {0}")]
    Fatal(String),

    #[error("cancelled: {0}")]
    Ignored(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient(_) | Self::Timeout(_) => ErrorKind::Transient,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::Ignored(_) => ErrorKind::Ignored,
        }
    }

    /// Short reason string used in per-item error results.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Fatal(_) => "fatal",
            Self::Ignored(_) => "cancelled",
        }
    }
}

/// Fail-fast rejection from an open circuit.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker open for {service} (retry after {retry_after:?})")]
pub struct CircuitOpen {
    pub service: String,
    pub retry_after: Duration,
}

/// Outcome of a call that did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error(transparent)]
    Open(#[from] CircuitOpen),

    #[error(transparent)]
    Service(ServiceError),

    /// An ignored-kind error passed through without affecting breaker state.
    #[error("ignored: {0}")]
    Ignored(ServiceError),
}

impl CallError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Open(_) => "circuit_open",
            Self::Service(err) | Self::Ignored(err) => err.reason(),
        }
    }
}

// ─── Checkpoint errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed checkpoint {path}: {message}")]
    Malformed { path: String, message: String },

    #[error("invalid step name: {0:?}")]
    InvalidStep(String),
}

// ─── Batch errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(
        "resource exhausted: {required_mb} MB required, {available_mb:?} MB available; reduce batch size or free memory"
    )]
    ResourceExhausted {
        required_mb: u64,
        available_mb: Option<u64>,
    },

    #[error("batch cancelled at item {item_id}: {message}")]
    Cancelled { item_id: String, message: String },

    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, LensError>;
