//! Persistence service contract

use crate::model::{Analysis, AnalysisId, Forecast, NewUpload, ProjectId, Summary, Upload, UploadId};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a persistence or analyze service.
///
/// Every variant is treated as a transient failure by the cascade: the
/// affected level keeps its last good value and nothing retries on its own.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed row: {0}")]
    Decode(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Names of the service operations, used for call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceOp {
    ListUploads,
    ListAnalyses,
    ListSummaries,
    ListForecasts,
    GetUpload,
    InsertUpload,
    UpdateUpload,
    DeleteUpload,
    InsertAnalysis,
    InsertSummary,
    InsertForecast,
    Analyze,
}

impl ServiceOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ListUploads => "list_uploads",
            Self::ListAnalyses => "list_analyses",
            Self::ListSummaries => "list_summaries",
            Self::ListForecasts => "list_forecasts",
            Self::GetUpload => "get_upload",
            Self::InsertUpload => "insert_upload",
            Self::UpdateUpload => "update_upload",
            Self::DeleteUpload => "delete_upload",
            Self::InsertAnalysis => "insert_analysis",
            Self::InsertSummary => "insert_summary",
            Self::InsertForecast => "insert_forecast",
            Self::Analyze => "analyze",
        }
    }
}

impl std::fmt::Display for ServiceOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persistence service the cascade reads from and mutations write to.
///
/// List operations are keyed by the parent level: an empty key slice is a
/// valid request, but the synchronizer never issues one.
#[async_trait]
pub trait ResourceService: Send + Sync {
    // === Parent-keyed lists ===

    async fn list_uploads(&self, project_id: &ProjectId) -> ServiceResult<Vec<Upload>>;

    async fn list_analyses(&self, upload_ids: &[UploadId]) -> ServiceResult<Vec<Analysis>>;

    async fn list_summaries(&self, analysis_ids: &[AnalysisId]) -> ServiceResult<Vec<Summary>>;

    async fn list_forecasts(&self, analysis_ids: &[AnalysisId]) -> ServiceResult<Vec<Forecast>>;

    // === Uploads ===

    async fn get_upload(&self, id: &UploadId) -> ServiceResult<Option<Upload>>;

    /// Insert an upload; the service assigns id and creation time.
    async fn insert_upload(&self, upload: NewUpload) -> ServiceResult<Upload>;

    async fn update_upload(&self, upload: &Upload) -> ServiceResult<()>;

    /// Delete an upload. Returns false if it did not exist.
    ///
    /// Whether dependent rows go with it is up to the service.
    async fn delete_upload(&self, id: &UploadId) -> ServiceResult<bool>;

    // === Derived rows (written by the analyze procedure) ===

    async fn insert_analysis(&self, analysis: &Analysis) -> ServiceResult<()>;

    async fn insert_summary(&self, summary: &Summary) -> ServiceResult<()>;

    async fn insert_forecast(&self, forecast: &Forecast) -> ServiceResult<()>;
}

/// Extension trait for services backed by a local file
pub trait OpenService: ResourceService + Sized {
    /// Open or create a service at the given path
    fn open(path: impl AsRef<Path>) -> ServiceResult<Self>;

    /// Create an in-memory service (useful for testing)
    fn open_in_memory() -> ServiceResult<Self>;
}
