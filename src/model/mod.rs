//! Record types of the four cascading levels

mod ids;
mod records;


pub use ids::{AnalysisId, ForecastId, ProjectId, SummaryId, UploadId};
pub use records::{
    Analysis, Dependent, Forecast, ForecastPoint, ForecastSeries, HistoricalPoint, Keyed,
    NewUpload, Project, Sentiment, Summary, Upload, UploadSource,
};
