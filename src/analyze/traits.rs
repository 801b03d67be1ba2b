//! Analyze procedure contract and the rows it derives

use crate::model::{
    Analysis, AnalysisId, Forecast, ForecastId, ForecastSeries, NewUpload, ProjectId, Sentiment,
    Summary, SummaryId, Upload, UploadId, UploadSource,
};
use crate::persistence::{ResourceService, ServiceError, ServiceResult};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// What to analyze.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeTarget {
    /// An existing upload, by id
    Upload(UploadId),
    /// Raw text; stored as a manual upload of `project_id` first
    Text { project_id: ProjectId, text: String },
}

/// A request to the analyze procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeRequest {
    pub target: AnalyzeTarget,
    /// Also derive a summary row
    pub summarize: bool,
    /// Also derive a forecast row covering this many days
    pub forecast_period: Option<u32>,
}

impl AnalyzeRequest {
    pub fn for_upload(upload_id: UploadId) -> Self {
        Self {
            target: AnalyzeTarget::Upload(upload_id),
            summarize: false,
            forecast_period: None,
        }
    }

    pub fn for_text(project_id: ProjectId, text: impl Into<String>) -> Self {
        Self {
            target: AnalyzeTarget::Text {
                project_id,
                text: text.into(),
            },
            summarize: false,
            forecast_period: None,
        }
    }

    pub fn with_summary(mut self) -> Self {
        self.summarize = true;
        self
    }

    pub fn with_forecast(mut self, period: u32) -> Self {
        self.forecast_period = Some(period);
        self
    }
}

/// What the analyze procedure returns: the analysis and any derived rows.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeResponse {
    pub analysis: Analysis,
    pub summary: Option<Summary>,
    pub forecast: Option<Forecast>,
    /// The upload as it stands after analysis (`processed` set)
    pub upload: Upload,
}

impl AnalyzeResponse {
    pub fn analysis_id(&self) -> &AnalysisId {
        &self.analysis.id
    }
}

/// Raw judgement produced by a sentiment engine, before rows exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub sentiment: Sentiment,
    pub sentiment_score: f64,
    pub dialect: String,
    pub dialect_confidence: f64,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub forecast: Option<ForecastSeries>,
}

impl Verdict {
    pub fn new(sentiment: Sentiment, score: f64, dialect: impl Into<String>, confidence: f64) -> Self {
        Self {
            sentiment,
            sentiment_score: score,
            dialect: dialect.into(),
            dialect_confidence: confidence,
            summary: None,
            forecast: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_forecast(mut self, series: ForecastSeries) -> Self {
        self.forecast = Some(series);
        self
    }

    /// Reject scores outside [0, 1] and blank dialects.
    pub fn validate(&self) -> ServiceResult<()> {
        if !(0.0..=1.0).contains(&self.sentiment_score) {
            return Err(ServiceError::Protocol(format!(
                "sentiment_score {} outside [0, 1]",
                self.sentiment_score
            )));
        }
        if !(0.0..=1.0).contains(&self.dialect_confidence) {
            return Err(ServiceError::Protocol(format!(
                "dialect_confidence {} outside [0, 1]",
                self.dialect_confidence
            )));
        }
        if self.dialect.trim().is_empty() {
            return Err(ServiceError::Protocol("empty dialect".to_string()));
        }
        Ok(())
    }
}

/// The long-running analyze procedure.
///
/// May take seconds and may fail independently of the persistence service.
#[async_trait]
pub trait AnalyzeService: Send + Sync {
    async fn analyze(&self, request: &AnalyzeRequest) -> ServiceResult<AnalyzeResponse>;
}

/// Find (or, for raw text, create) the upload a request points at.
pub(crate) async fn resolve_target(
    resources: &dyn ResourceService,
    target: &AnalyzeTarget,
) -> ServiceResult<Upload> {
    match target {
        AnalyzeTarget::Upload(id) => resources
            .get_upload(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("upload {}", id))),
        AnalyzeTarget::Text { project_id, text } => {
            resources
                .insert_upload(NewUpload::new(project_id.clone(), UploadSource::Manual, text.clone()))
                .await
        }
    }
}

/// Write the rows a verdict produces and flag the upload as processed.
pub(crate) async fn record_verdict(
    resources: &dyn ResourceService,
    mut upload: Upload,
    verdict: Verdict,
    request: &AnalyzeRequest,
) -> ServiceResult<AnalyzeResponse> {
    verdict.validate()?;
    let now = Utc::now();

    let analysis = Analysis {
        id: AnalysisId::new(),
        upload_id: upload.id.clone(),
        sentiment: verdict.sentiment,
        sentiment_score: verdict.sentiment_score,
        dialect: verdict.dialect,
        dialect_confidence: verdict.dialect_confidence,
        created_at: now,
    };
    resources.insert_analysis(&analysis).await?;

    let summary = match (request.summarize, verdict.summary) {
        (true, Some(text)) => {
            let summary = Summary {
                id: SummaryId::new(),
                analysis_id: analysis.id.clone(),
                summary_text: text,
                created_at: now,
            };
            resources.insert_summary(&summary).await?;
            Some(summary)
        }
        _ => None,
    };

    let forecast = match (request.forecast_period, verdict.forecast) {
        (Some(period), Some(series)) => {
            let forecast = Forecast {
                id: ForecastId::new(),
                analysis_id: analysis.id.clone(),
                forecast_json: series,
                forecast_period: period,
                created_at: now,
            };
            resources.insert_forecast(&forecast).await?;
            Some(forecast)
        }
        _ => None,
    };

    upload.processed = true;
    resources.update_upload(&upload).await?;

    Ok(AnalyzeResponse {
        analysis,
        summary,
        forecast,
        upload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_rejects_out_of_range_scores() {
        assert!(Verdict::new(Sentiment::Positive, 1.2, "msa", 0.5).validate().is_err());
        assert!(Verdict::new(Sentiment::Positive, 0.3, "msa", -0.1).validate().is_err());
        assert!(Verdict::new(Sentiment::Positive, 0.3, "  ", 0.5).validate().is_err());
        assert!(Verdict::new(Sentiment::Neutral, 0.0, "msa", 1.0).validate().is_ok());
    }

    #[test]
    fn verdict_parses_engine_output() {
        let verdict: Verdict = serde_json::from_str(
            r#"{"sentiment":"negative","sentiment_score":0.1,"dialect":"maghrebi","dialect_confidence":0.55}"#,
        )
        .unwrap();
        assert_eq!(verdict.sentiment, Sentiment::Negative);
        assert!(verdict.summary.is_none());
        assert!(verdict.forecast.is_none());
    }

    #[test]
    fn request_builders_set_options() {
        let request = AnalyzeRequest::for_upload(UploadId::from("u1")).with_summary().with_forecast(14);
        assert!(request.summarize);
        assert_eq!(request.forecast_period, Some(14));
        assert_eq!(request.target, AnalyzeTarget::Upload(UploadId::from("u1")));
    }
}
