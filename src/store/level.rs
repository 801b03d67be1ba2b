//! The four cascading levels and their per-level status

use crate::model::{Analysis, Forecast, Summary, Upload};
use serde::{Deserialize, Serialize};

/// One of the four collections held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Uploads,
    Analyses,
    Summaries,
    Forecasts,
}

impl Level {
    /// All levels in cascade order
    pub const ALL: [Level; 4] = [Level::Uploads, Level::Analyses, Level::Summaries, Level::Forecasts];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploads => "uploads",
            Self::Analyses => "analyses",
            Self::Summaries => "summaries",
            Self::Forecasts => "forecasts",
        }
    }

    /// Levels whose keys derive from this one, transitively
    pub fn downstream(&self) -> &'static [Level] {
        match self {
            Self::Uploads => &[Level::Analyses, Level::Summaries, Level::Forecasts],
            Self::Analyses => &[Level::Summaries, Level::Forecasts],
            Self::Summaries | Self::Forecasts => &[],
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable `{loading, error}` state of a level
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelStatus {
    pub loading: bool,
    pub error: Option<String>,
}

impl LevelStatus {
    pub fn ready() -> Self {
        Self::default()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            loading: false,
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// A full replacement for one level
#[derive(Debug, Clone, PartialEq)]
pub enum LevelData {
    Uploads(Vec<Upload>),
    Analyses(Vec<Analysis>),
    Summaries(Vec<Summary>),
    Forecasts(Vec<Forecast>),
}

impl LevelData {
    pub fn level(&self) -> Level {
        match self {
            Self::Uploads(_) => Level::Uploads,
            Self::Analyses(_) => Level::Analyses,
            Self::Summaries(_) => Level::Summaries,
            Self::Forecasts(_) => Level::Forecasts,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Uploads(v) => v.len(),
            Self::Analyses(v) => v.len(),
            Self::Summaries(v) => v.len(),
            Self::Forecasts(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single record destined for one level
#[derive(Debug, Clone, PartialEq)]
pub enum LevelRecord {
    Upload(Upload),
    Analysis(Analysis),
    Summary(Summary),
    Forecast(Forecast),
}

impl LevelRecord {
    pub fn level(&self) -> Level {
        match self {
            Self::Upload(_) => Level::Uploads,
            Self::Analysis(_) => Level::Analyses,
            Self::Summary(_) => Level::Summaries,
            Self::Forecast(_) => Level::Forecasts,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Upload(r) => r.id.as_str(),
            Self::Analysis(r) => r.id.as_str(),
            Self::Summary(r) => r.id.as_str(),
            Self::Forecast(r) => r.id.as_str(),
        }
    }
}
