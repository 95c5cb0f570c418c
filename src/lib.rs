#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod batch;
pub mod cache;
pub mod classify;
pub mod config;
#[doc(hidden)]
pub mod diagnostics;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod resilience;
pub mod runtime;

pub use batch::{BatchCoordinator, BatchOptions, BatchOutcome, ItemResult};
pub use config::Config;
pub use error::{LensError, Result};
