//! Shared helpers for the integration tests
//!
//! `GatedService` wraps a `MemoryService` and can park the next call of a
//! chosen operation after it has read its result, so tests can interleave
//! cascade runs deterministically.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use strata::{
    sample_verdict, Analysis, AnalysisId, Forecast, LevelStatus, MemoryService, MockAnalyzer,
    NewUpload, Project, ProjectId, ResourceService, Sentiment, ServiceOp, ServiceResult,
    StoreSnapshot, Summary, SummaryId, SyncSession, TierToken, Upload, UploadId, UploadSource,
};
use tokio::sync::{watch, Notify};

/// A parked call: `entered` fires once the call has its result,
/// `release` lets it return.
#[derive(Default)]
pub struct Hold {
    entered: Notify,
    release: Notify,
}

impl Hold {
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

pub struct GatedService {
    pub inner: MemoryService,
    holds: Mutex<HashMap<ServiceOp, VecDeque<Arc<Hold>>>>,
}

impl GatedService {
    pub fn new(inner: MemoryService) -> Self {
        Self {
            inner,
            holds: Mutex::new(HashMap::new()),
        }
    }

    /// Park the next call of `op`.
    pub fn hold_next(&self, op: ServiceOp) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        self.holds
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(hold.clone());
        hold
    }

    async fn pause(&self, op: ServiceOp) {
        let hold = {
            let mut holds = self.holds.lock().unwrap();
            holds.get_mut(&op).and_then(|q| q.pop_front())
        };
        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
    }
}

#[async_trait]
impl ResourceService for GatedService {
    async fn list_uploads(&self, project_id: &ProjectId) -> ServiceResult<Vec<Upload>> {
        let result = self.inner.list_uploads(project_id).await;
        self.pause(ServiceOp::ListUploads).await;
        result
    }

    async fn list_analyses(&self, upload_ids: &[UploadId]) -> ServiceResult<Vec<Analysis>> {
        let result = self.inner.list_analyses(upload_ids).await;
        self.pause(ServiceOp::ListAnalyses).await;
        result
    }

    async fn list_summaries(&self, analysis_ids: &[AnalysisId]) -> ServiceResult<Vec<Summary>> {
        let result = self.inner.list_summaries(analysis_ids).await;
        self.pause(ServiceOp::ListSummaries).await;
        result
    }

    async fn list_forecasts(&self, analysis_ids: &[AnalysisId]) -> ServiceResult<Vec<Forecast>> {
        let result = self.inner.list_forecasts(analysis_ids).await;
        self.pause(ServiceOp::ListForecasts).await;
        result
    }

    async fn get_upload(&self, id: &UploadId) -> ServiceResult<Option<Upload>> {
        self.inner.get_upload(id).await
    }

    async fn insert_upload(&self, upload: NewUpload) -> ServiceResult<Upload> {
        self.inner.insert_upload(upload).await
    }

    async fn update_upload(&self, upload: &Upload) -> ServiceResult<()> {
        self.inner.update_upload(upload).await
    }

    async fn delete_upload(&self, id: &UploadId) -> ServiceResult<bool> {
        let result = self.inner.delete_upload(id).await;
        self.pause(ServiceOp::DeleteUpload).await;
        result
    }

    async fn insert_analysis(&self, analysis: &Analysis) -> ServiceResult<()> {
        self.inner.insert_analysis(analysis).await
    }

    async fn insert_summary(&self, summary: &Summary) -> ServiceResult<()> {
        self.inner.insert_summary(summary).await
    }

    async fn insert_forecast(&self, forecast: &Forecast) -> ServiceResult<()> {
        self.inner.insert_forecast(forecast).await
    }
}

pub fn project(id: &str) -> Project {
    Project::with_id(ProjectId::from(id), id)
}

pub fn upload(project: &Project, text: &str) -> Upload {
    NewUpload::new(project.id.clone(), UploadSource::Manual, text).into_upload()
}

pub fn analysis(upload: &Upload) -> Analysis {
    Analysis {
        id: AnalysisId::new(),
        upload_id: upload.id.clone(),
        sentiment: Sentiment::Neutral,
        sentiment_score: 0.5,
        dialect: "msa".into(),
        dialect_confidence: 0.9,
        created_at: Utc::now(),
    }
}

pub fn summary(analysis: &Analysis) -> Summary {
    Summary {
        id: SummaryId::new(),
        analysis_id: analysis.id.clone(),
        summary_text: "summary".into(),
        created_at: Utc::now(),
    }
}

/// A session over `service` with a mock analyzer at the given tier.
pub fn session_over(service: Arc<dyn ResourceService>, tier: &str) -> (SyncSession, watch::Sender<TierToken>) {
    let (tier_tx, tier_rx) = watch::channel(TierToken::from(tier));
    let analyzer = Arc::new(MockAnalyzer::new(service.clone(), sample_verdict()));
    (SyncSession::new(service, analyzer, tier_rx), tier_tx)
}

/// Every cached dependent's parent is cached too.
pub fn assert_no_orphans(snapshot: &StoreSnapshot) {
    let uploads: HashSet<&UploadId> = snapshot.uploads.iter().map(|u| &u.id).collect();
    let analyses: HashSet<&AnalysisId> = snapshot.analyses.iter().map(|a| &a.id).collect();
    for a in &snapshot.analyses {
        assert!(uploads.contains(&a.upload_id), "orphan analysis {} (upload {})", a.id, a.upload_id);
    }
    for s in &snapshot.summaries {
        assert!(analyses.contains(&s.analysis_id), "orphan summary {}", s.id);
    }
    for f in &snapshot.forecasts {
        assert!(analyses.contains(&f.analysis_id), "orphan forecast {}", f.id);
    }
}

pub fn is_settled(status: &LevelStatus) -> bool {
    !status.loading && status.error.is_none()
}
