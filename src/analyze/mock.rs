//! Mock analyzer for testing: returns a preconfigured verdict.

use super::traits::{record_verdict, resolve_target, AnalyzeRequest, AnalyzeResponse, AnalyzeService, Verdict};
use crate::model::{ForecastPoint, ForecastSeries, HistoricalPoint, Sentiment};
use crate::persistence::{ResourceService, ServiceError, ServiceResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Answers every request with the same verdict (or the same failure) and
/// writes the resulting rows through `resources`.
pub struct MockAnalyzer {
    resources: Arc<dyn ResourceService>,
    outcome: Result<Verdict, String>,
    calls: AtomicUsize,
}

impl MockAnalyzer {
    pub fn new(resources: Arc<dyn ResourceService>, verdict: Verdict) -> Self {
        Self {
            resources,
            outcome: Ok(verdict),
            calls: AtomicUsize::new(0),
        }
    }

    /// An analyzer whose every call fails with a network error.
    pub fn failing(resources: Arc<dyn ResourceService>, message: impl Into<String>) -> Self {
        Self {
            resources,
            outcome: Err(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyzeService for MockAnalyzer {
    async fn analyze(&self, request: &AnalyzeRequest) -> ServiceResult<AnalyzeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdict = match &self.outcome {
            Ok(verdict) => verdict.clone(),
            Err(message) => return Err(ServiceError::Network(message.clone())),
        };
        let upload = resolve_target(self.resources.as_ref(), &request.target).await?;
        record_verdict(self.resources.as_ref(), upload, verdict, request).await
    }
}

/// A positive verdict carrying both a summary and a three-day forecast.
pub fn sample_verdict() -> Verdict {
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or_default();
    let days: Vec<NaiveDate> = start.iter_days().take(5).collect();
    Verdict::new(Sentiment::Positive, 0.8, "egyptian", 0.7)
        .with_summary("Readers welcome the announcement.")
        .with_forecast(ForecastSeries {
            historical: days[..2]
                .iter()
                .map(|&date| HistoricalPoint { date, sentiment_score: 0.6 })
                .collect(),
            forecast: days[2..]
                .iter()
                .map(|&date| ForecastPoint { date, sentiment_score: 0.7, is_forecast: true })
                .collect(),
        })
}
