//! Identifiers for every record kind in the cascade

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        ///
        /// Serializes as a plain string (UUID or an id assigned by the backing service).
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random id (UUID-based)
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Create an id from an existing string
            pub fn from_string(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Root key of the cascade
    ProjectId
);
string_id!(
    /// Identifier of an uploaded text
    UploadId
);
string_id!(
    /// Identifier of a sentiment analysis
    AnalysisId
);
string_id!(
    /// Identifier of an analysis summary
    SummaryId
);
string_id!(
    /// Identifier of a sentiment forecast
    ForecastId
);
