//! The classification service boundary: the consumed capability, an
//! OpenAI-compatible implementation, and interpretation of its output.

pub mod compatible;
pub mod prompt;
pub mod response;
pub mod scrub;
pub mod traits;

pub use compatible::OpenAiCompatibleClassifier;
pub use prompt::{PullRequestRecord, WorkItem, build_prompt, fingerprint};
pub use response::{
    ClassificationResult, ResponseParseError, TokenUsage, WorkType, parse_classification,
};
pub use traits::{Classifier, ClassifierResponse};
