//! Batch coordination: bounded-concurrency classification with caching,
//! memory awareness, and per-step checkpoints.

pub mod checkpoint;
pub mod coordinator;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManifest, CheckpointRecord, CheckpointStore, StoredCheckpoint};
pub use coordinator::BatchCoordinator;
pub use types::{BatchOptions, BatchOutcome, BatchSummary, ErrorResult, FailureReason, ItemResult};
