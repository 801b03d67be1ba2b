//! Mutations and the re-sync each one triggers
//!
//! Gated operations consult the `FeatureGate` before any service call.
//! Successful mutations re-enter the cascade at Stage 1; a successful analyze
//! also merges its new rows straight into the store.

mod coordinator;
mod error;

pub use coordinator::{
    AnalyzeOptions, MutationCoordinator, MutationLimits, MutationOutcome, DEFAULT_MAX_BULK_ITEMS,
    DEFAULT_MAX_UPLOAD_CHARS,
};
pub use error::{MutationError, MutationResult};
