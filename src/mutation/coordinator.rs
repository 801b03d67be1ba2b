//! MutationCoordinator: create, analyze and delete, then re-sync

use super::error::{MutationError, MutationResult};
use crate::analyze::{AnalyzeRequest, AnalyzeResponse, AnalyzeService};
use crate::gate::{Capability, FeatureGate, TierToken};
use crate::model::{NewUpload, ProjectId, Upload, UploadId};
use crate::persistence::{ResourceService, ServiceError};
use crate::store::LevelRecord;
use crate::sync::{CascadeReport, CascadeSynchronizer, NodeKind, SyncMode};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_UPLOAD_CHARS: usize = 20_000;
pub const DEFAULT_MAX_BULK_ITEMS: usize = 100;

/// Input limits enforced before a mutation is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationLimits {
    pub max_upload_chars: usize,
    pub max_bulk_items: usize,
}

impl Default for MutationLimits {
    fn default() -> Self {
        Self {
            max_upload_chars: DEFAULT_MAX_UPLOAD_CHARS,
            max_bulk_items: DEFAULT_MAX_BULK_ITEMS,
        }
    }
}

/// Which derived rows to ask the analyze procedure for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnalyzeOptions {
    pub summarize: bool,
    pub forecast_period: Option<u32>,
}

impl AnalyzeOptions {
    pub fn with_summary(mut self) -> Self {
        self.summarize = true;
        self
    }

    pub fn with_forecast(mut self, period: u32) -> Self {
        self.forecast_period = Some(period);
        self
    }

    fn capabilities(&self) -> Vec<Capability> {
        let mut wanted = vec![Capability::Analysis];
        if self.summarize {
            wanted.push(Capability::Summarization);
        }
        if self.forecast_period.is_some() {
            wanted.push(Capability::Forecasting);
        }
        wanted
    }

    fn apply(&self, mut request: AnalyzeRequest) -> AnalyzeRequest {
        request.summarize = self.summarize;
        request.forecast_period = self.forecast_period;
        request
    }
}

/// A completed mutation and the re-sync it triggered.
#[derive(Debug, Clone)]
pub struct MutationOutcome<T> {
    pub value: T,
    pub sync: CascadeReport,
}

pub struct MutationCoordinator {
    service: Arc<dyn ResourceService>,
    analyzer: Arc<dyn AnalyzeService>,
    cascade: Arc<CascadeSynchronizer>,
    gate: FeatureGate,
    tier: watch::Receiver<TierToken>,
    limits: MutationLimits,
}

impl MutationCoordinator {
    pub fn new(
        service: Arc<dyn ResourceService>,
        analyzer: Arc<dyn AnalyzeService>,
        cascade: Arc<CascadeSynchronizer>,
        tier: watch::Receiver<TierToken>,
    ) -> Self {
        Self {
            service,
            analyzer,
            cascade,
            gate: FeatureGate::new(),
            tier,
            limits: MutationLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: MutationLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> MutationLimits {
        self.limits
    }

    /// The tier token currently published by the subscription provider
    pub fn tier(&self) -> TierToken {
        self.tier.borrow().clone()
    }

    pub fn can_perform(&self, capability: Capability) -> bool {
        self.gate.can_perform(&self.tier(), capability)
    }

    /// Insert one upload, then re-sync its project from Stage 1.
    pub async fn create_upload(&self, upload: NewUpload) -> MutationResult<MutationOutcome<Upload>> {
        if upload.source.is_external() {
            self.authorize(Capability::ExternalIngestion)?;
        }
        self.check_upload(&upload).map_err(MutationError::Validation)?;

        let row = self.service.insert_upload(upload).await?;
        info!(upload = %row.id, project = %row.project_id, source = %row.source, "upload created");

        let sync = self.cascade.run(&row.project_id, SyncMode::Incremental).await;
        Ok(MutationOutcome { value: row, sync })
    }

    /// Insert many uploads of one project, validated all-or-nothing up front.
    pub async fn create_uploads_bulk(
        &self,
        uploads: Vec<NewUpload>,
    ) -> MutationResult<MutationOutcome<Vec<Upload>>> {
        self.authorize(Capability::BulkUpload)?;
        if uploads.iter().any(|u| u.source.is_external()) {
            self.authorize(Capability::ExternalIngestion)?;
        }

        let project = match uploads.first() {
            Some(first) => first.project_id.clone(),
            None => return Err(MutationError::validation("bulk upload is empty")),
        };
        if uploads.len() > self.limits.max_bulk_items {
            return Err(MutationError::Validation(format!(
                "bulk upload has {} items; at most {} allowed",
                uploads.len(),
                self.limits.max_bulk_items
            )));
        }
        for (i, upload) in uploads.iter().enumerate() {
            if upload.project_id != project {
                return Err(MutationError::Validation(format!(
                    "item {}: every upload in a bulk call must target project {}",
                    i, project
                )));
            }
            self.check_upload(upload)
                .map_err(|e| MutationError::Validation(format!("item {}: {}", i, e)))?;
        }

        let mut rows = Vec::with_capacity(uploads.len());
        for upload in uploads {
            match self.service.insert_upload(upload).await {
                Ok(row) => rows.push(row),
                Err(e) => {
                    warn!(project = %project, inserted = rows.len(), error = %e, "bulk upload interrupted");
                    return Err(e.into());
                }
            }
        }
        info!(project = %project, count = rows.len(), "bulk upload created");

        let sync = self.cascade.run(&project, SyncMode::Incremental).await;
        Ok(MutationOutcome { value: rows, sync })
    }

    /// Analyze an existing upload.
    ///
    /// On success the new rows are merged into the store at once when the
    /// upload is cached, then the project re-syncs from Stage 1.
    pub async fn request_analysis(
        &self,
        upload_id: &UploadId,
        options: AnalyzeOptions,
    ) -> MutationResult<MutationOutcome<AnalyzeResponse>> {
        self.authorize_all(&options)?;
        self.analyze(options.apply(AnalyzeRequest::for_upload(upload_id.clone())))
            .await
    }

    /// Store raw text as a manual upload of `project_id` and analyze it.
    pub async fn analyze_text(
        &self,
        project_id: &ProjectId,
        text: &str,
        options: AnalyzeOptions,
    ) -> MutationResult<MutationOutcome<AnalyzeResponse>> {
        self.authorize_all(&options)?;
        self.check_text(text).map_err(MutationError::Validation)?;
        self.analyze(options.apply(AnalyzeRequest::for_text(project_id.clone(), text)))
            .await
    }

    /// Delete an upload, then fully re-sync its project.
    pub async fn delete_upload(&self, upload_id: &UploadId) -> MutationResult<MutationOutcome<()>> {
        let owner = match self.cascade.store().upload(upload_id) {
            Some(upload) => upload.project_id,
            None => self
                .service
                .get_upload(upload_id)
                .await?
                .map(|u| u.project_id)
                .ok_or_else(|| ServiceError::NotFound(format!("upload {}", upload_id)))?,
        };

        if !self.service.delete_upload(upload_id).await? {
            return Err(ServiceError::NotFound(format!("upload {}", upload_id)).into());
        }
        info!(upload = %upload_id, project = %owner, "upload deleted");

        // Server-side cleanup of dependents is opaque: refetch every level.
        let sync = self.cascade.run(&owner, SyncMode::Full).await;
        Ok(MutationOutcome { value: (), sync })
    }

    async fn analyze(&self, request: AnalyzeRequest) -> MutationResult<MutationOutcome<AnalyzeResponse>> {
        let response = self.analyzer.analyze(&request).await?;
        info!(
            upload = %response.upload.id,
            analysis = %response.analysis_id(),
            sentiment = %response.analysis.sentiment,
            "analysis recorded"
        );

        let merged = self.fast_path(&response);
        // Analyses changed server-side under an unchanged upload key set.
        self.cascade.invalidate(NodeKind::Analysis);
        let sync = self
            .cascade
            .run(&response.upload.project_id, SyncMode::Incremental)
            .await;
        if !merged {
            debug!(upload = %response.upload.id, "upload not cached; rows arrive with the re-sync");
        }
        Ok(MutationOutcome { value: response, sync })
    }

    /// Merge the new analysis and its derived rows ahead of the re-sync.
    ///
    /// Skipped unless the upload is cached for the active project, so a
    /// merged record always has its parent present.
    fn fast_path(&self, response: &AnalyzeResponse) -> bool {
        let mut records = vec![LevelRecord::Analysis(response.analysis.clone())];
        records.extend(response.summary.clone().map(LevelRecord::Summary));
        records.extend(response.forecast.clone().map(LevelRecord::Forecast));
        self.cascade
            .merge(&response.upload.project_id, records)
            .is_some()
    }

    fn authorize(&self, capability: Capability) -> MutationResult<()> {
        self.gate.check(&self.tier(), capability).map_err(|denial| {
            info!(tier = %denial.tier, capability = %denial.capability, "mutation denied by feature gate");
            MutationError::from(denial)
        })
    }

    fn authorize_all(&self, options: &AnalyzeOptions) -> MutationResult<()> {
        options
            .capabilities()
            .into_iter()
            .try_for_each(|capability| self.authorize(capability))
    }

    fn check_upload(&self, upload: &NewUpload) -> Result<(), String> {
        self.check_text(&upload.raw_text)?;
        match &upload.metadata {
            Some(value) if !value.is_object() && !value.is_null() => {
                Err("metadata must be a JSON object".to_string())
            }
            _ => Ok(()),
        }
    }

    fn check_text(&self, text: &str) -> Result<(), String> {
        if text.trim().is_empty() {
            return Err("upload text is empty".to_string());
        }
        let chars = text.chars().count();
        if chars > self.limits.max_upload_chars {
            return Err(format!(
                "upload text has {} characters; at most {} allowed",
                chars, self.limits.max_upload_chars
            ));
        }
        Ok(())
    }
}
