use crate::gate::{Capability, Denial, Tier};
use crate::persistence::ServiceError;
use thiserror::Error;

/// Why a mutation did not happen.
///
/// Every variant leaves the store untouched.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("upgrade required: {capability} needs the {required} tier (current tier: {tier})")]
    UpgradeRequired {
        tier: Tier,
        capability: Capability,
        required: Tier,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl MutationError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for errors raised before any call reached a service
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::UpgradeRequired { .. })
    }
}

impl From<Denial> for MutationError {
    fn from(denial: Denial) -> Self {
        Self::UpgradeRequired {
            tier: denial.tier,
            capability: denial.capability,
            required: denial.required,
        }
    }
}

pub type MutationResult<T> = Result<T, MutationError>;
