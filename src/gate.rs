//! Feature gate: which subscription tier may start which mutation
//!
//! Advisory only. The gate stops the client from issuing calls a tier is
//! not entitled to; the services remain responsible for enforcing access.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Opaque capability descriptor handed out by the subscription provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierToken(String);

impl TierToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The tier this token grants. Unrecognised tokens grant `Free`.
    pub fn tier(&self) -> Tier {
        self.0.parse().unwrap_or(Tier::Free)
    }
}

impl Default for TierToken {
    fn default() -> Self {
        Self(Tier::Free.as_str().to_string())
    }
}

impl std::fmt::Display for TierToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TierToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Subscription tiers, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(format!("unknown tier '{}'", other)),
        }
    }
}

/// Gated operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Run the analyze procedure on an upload
    Analysis,
    /// Ask the analyze procedure for a summary row
    Summarization,
    /// Ask the analyze procedure for a forecast row
    Forecasting,
    /// Create uploads from news providers rather than by hand
    ExternalIngestion,
    /// Create many uploads in one call
    BulkUpload,
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::Analysis,
        Capability::Summarization,
        Capability::Forecasting,
        Capability::ExternalIngestion,
        Capability::BulkUpload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Summarization => "summarization",
            Self::Forecasting => "forecasting",
            Self::ExternalIngestion => "external-ingestion",
            Self::BulkUpload => "bulk-upload",
        }
    }

    /// Lowest tier allowed to use this capability
    pub fn minimum_tier(&self) -> Tier {
        match self {
            Self::Analysis => Tier::Free,
            Self::Summarization | Self::Forecasting | Self::ExternalIngestion => Tier::Pro,
            Self::BulkUpload => Tier::Enterprise,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown capability '{}'", wanted))
    }
}

/// A refused capability check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub tier: Tier,
    pub capability: Capability,
    pub required: Tier,
}

/// Pure, synchronous capability policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureGate;

impl FeatureGate {
    pub fn new() -> Self {
        Self
    }

    pub fn can_perform(&self, tier: &TierToken, capability: Capability) -> bool {
        tier.tier() >= capability.minimum_tier()
    }

    /// Like `can_perform`, but says what was missing.
    pub fn check(&self, tier: &TierToken, capability: Capability) -> Result<(), Denial> {
        if self.can_perform(tier, capability) {
            Ok(())
        } else {
            Err(Denial {
                tier: tier.tier(),
                capability,
                required: capability.minimum_tier(),
            })
        }
    }
}

/// String form of the gate: unknown capabilities are always denied.
pub fn can_perform(tier_token: &str, capability: &str) -> bool {
    match capability.parse::<Capability>() {
        Ok(capability) => FeatureGate.can_perform(&TierToken::from(tier_token), capability),
        Err(_) => false,
    }
}
