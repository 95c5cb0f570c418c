pub mod ttl;

pub use ttl::{CacheStats, TtlCache};

use crate::classify::ClassificationResult;

/// Classification results keyed by work-item fingerprint.
pub type ResultCache = TtlCache<ClassificationResult>;
