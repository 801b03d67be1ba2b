//! Records held by the cascade: projects, uploads and their derived analyses

use super::ids::{AnalysisId, ForecastId, ProjectId, SummaryId, UploadId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A record that is indexed by its own id.
pub trait Keyed {
    type Key: Clone + Eq + std::hash::Hash + Ord + AsRef<str>;

    fn key(&self) -> &Self::Key;
}

/// A record owned by a parent record one level up the cascade.
pub trait Dependent: Keyed {
    type Parent: Clone + Eq + std::hash::Hash + Ord + AsRef<str>;

    fn parent_key(&self) -> &Self::Parent;
}

/// Where an upload's text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadSource {
    Manual,
    NewsApi,
    BrightData,
    NewsData,
}

impl UploadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::NewsApi => "newsapi",
            Self::BrightData => "brightdata",
            Self::NewsData => "newsdata",
        }
    }

    /// True for sources fed by an ingestion provider rather than typed in by hand
    pub fn is_external(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

impl std::fmt::Display for UploadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "newsapi" => Ok(Self::NewsApi),
            "brightdata" => Ok(Self::BrightData),
            "newsdata" => Ok(Self::NewsData),
            other => Err(format!("unknown upload source '{}'", other)),
        }
    }
}

/// Polarity assigned by the analyze procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sentiment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "positive" => Ok(Self::Positive),
            "negative" => Ok(Self::Negative),
            "neutral" => Ok(Self::Neutral),
            other => Err(format!("unknown sentiment '{}'", other)),
        }
    }
}

/// Root of the cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    #[serde(default)]
    pub name: String,
    pub active: bool,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            active: true,
        }
    }

    pub fn with_id(id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            active: true,
        }
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A piece of text submitted to a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    pub id: UploadId,
    pub project_id: ProjectId,
    pub source: UploadSource,
    pub raw_text: String,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    /// Caller-supplied metadata (JSON object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Keyed for Upload {
    type Key = UploadId;

    fn key(&self) -> &UploadId {
        &self.id
    }
}

/// Insert payload for an upload; the service assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUpload {
    pub project_id: ProjectId,
    pub source: UploadSource,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl NewUpload {
    pub fn new(project_id: ProjectId, source: UploadSource, raw_text: impl Into<String>) -> Self {
        Self {
            project_id,
            source,
            raw_text: raw_text.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Materialize the row a service would store for this payload.
    pub fn into_upload(self) -> Upload {
        Upload {
            id: UploadId::new(),
            project_id: self.project_id,
            source: self.source,
            raw_text: self.raw_text,
            processed: false,
            created_at: Utc::now(),
            metadata: self.metadata,
        }
    }
}

/// Result of a successful analyze call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub upload_id: UploadId,
    pub sentiment: Sentiment,
    /// In [0, 1]
    pub sentiment_score: f64,
    pub dialect: String,
    /// In [0, 1]
    pub dialect_confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl Keyed for Analysis {
    type Key = AnalysisId;

    fn key(&self) -> &AnalysisId {
        &self.id
    }
}

impl Dependent for Analysis {
    type Parent = UploadId;

    fn parent_key(&self) -> &UploadId {
        &self.upload_id
    }
}

/// Free-text summary of an analysis (0 or 1 per analysis)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub id: SummaryId,
    pub analysis_id: AnalysisId,
    pub summary_text: String,
    pub created_at: DateTime<Utc>,
}

impl Keyed for Summary {
    type Key = SummaryId;

    fn key(&self) -> &SummaryId {
        &self.id
    }
}

impl Dependent for Summary {
    type Parent = AnalysisId;

    fn parent_key(&self) -> &AnalysisId {
        &self.analysis_id
    }
}

/// One observed point of the sentiment series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPoint {
    pub date: NaiveDate,
    pub sentiment_score: f64,
}

/// One point of the projected series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub sentiment_score: f64,
    pub is_forecast: bool,
}

/// The `forecast_json` payload of a forecast row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    #[serde(default)]
    pub historical: Vec<HistoricalPoint>,
    #[serde(default)]
    pub forecast: Vec<ForecastPoint>,
}

/// Sentiment projection for an analysis (0 or 1 per analysis)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub id: ForecastId,
    pub analysis_id: AnalysisId,
    pub forecast_json: ForecastSeries,
    /// Number of projected days
    pub forecast_period: u32,
    pub created_at: DateTime<Utc>,
}

impl Keyed for Forecast {
    type Key = ForecastId;

    fn key(&self) -> &ForecastId {
        &self.id
    }
}

impl Dependent for Forecast {
    type Parent = AnalysisId;

    fn parent_key(&self) -> &AnalysisId {
        &self.analysis_id
    }
}
