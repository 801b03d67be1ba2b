//! In-memory persistence service
//!
//! Keeps every table in process memory, counts calls per operation and can
//! fail a chosen operation once. Used by tests and by embedders that do not
//! need durability.

use super::traits::{ResourceService, ServiceError, ServiceOp, ServiceResult};
use crate::model::{
    Analysis, AnalysisId, Forecast, NewUpload, Project, ProjectId, Summary, Upload, UploadId,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct Tables {
    projects: Vec<Project>,
    uploads: Vec<Upload>,
    analyses: Vec<Analysis>,
    summaries: Vec<Summary>,
    forecasts: Vec<Forecast>,
}

/// A `ResourceService` held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryService {
    tables: Mutex<Tables>,
    calls: DashMap<ServiceOp, usize>,
    failures: DashMap<ServiceOp, String>,
    cascade_deletes: bool,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete analyses, summaries and forecasts together with their upload.
    pub fn with_cascade_deletes(mut self, enabled: bool) -> Self {
        self.cascade_deletes = enabled;
        self
    }

    /// Make the next call to `op` fail with a network error.
    pub fn fail_next(&self, op: ServiceOp, message: impl Into<String>) {
        self.failures.insert(op, message.into());
    }

    /// How many times `op` was called (including failed calls)
    pub fn call_count(&self, op: ServiceOp) -> usize {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    /// Total calls across every operation
    pub fn total_calls(&self) -> usize {
        self.calls.iter().map(|c| *c.value()).sum()
    }

    pub fn reset_counts(&self) {
        self.calls.clear();
    }

    pub fn add_project(&self, project: Project) {
        self.with_tables(|t| t.projects.push(project));
    }

    pub fn projects(&self) -> Vec<Project> {
        self.with_tables(|t| t.projects.clone())
    }

    // === Seeding (not counted) ===

    pub fn seed_upload(&self, upload: Upload) {
        self.with_tables(|t| t.uploads.push(upload));
    }

    pub fn seed_analysis(&self, analysis: Analysis) {
        self.with_tables(|t| t.analyses.push(analysis));
    }

    pub fn seed_summary(&self, summary: Summary) {
        self.with_tables(|t| t.summaries.push(summary));
    }

    pub fn seed_forecast(&self, forecast: Forecast) {
        self.with_tables(|t| t.forecasts.push(forecast));
    }

    /// Remove an analysis row behind the client's back.
    pub fn remove_analysis(&self, id: &AnalysisId) {
        self.with_tables(|t| t.analyses.retain(|a| &a.id != id));
    }

    fn with_tables<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut tables)
    }

    /// Count the call and fire an injected failure, if one is armed.
    fn enter(&self, op: ServiceOp) -> ServiceResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.remove(&op) {
            Some((_, message)) => Err(ServiceError::Network(message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceService for MemoryService {
    async fn list_uploads(&self, project_id: &ProjectId) -> ServiceResult<Vec<Upload>> {
        self.enter(ServiceOp::ListUploads)?;
        Ok(self.with_tables(|t| {
            t.uploads
                .iter()
                .filter(|u| &u.project_id == project_id)
                .cloned()
                .collect()
        }))
    }

    async fn list_analyses(&self, upload_ids: &[UploadId]) -> ServiceResult<Vec<Analysis>> {
        self.enter(ServiceOp::ListAnalyses)?;
        let wanted: HashSet<&UploadId> = upload_ids.iter().collect();
        Ok(self.with_tables(|t| {
            t.analyses
                .iter()
                .filter(|a| wanted.contains(&a.upload_id))
                .cloned()
                .collect()
        }))
    }

    async fn list_summaries(&self, analysis_ids: &[AnalysisId]) -> ServiceResult<Vec<Summary>> {
        self.enter(ServiceOp::ListSummaries)?;
        let wanted: HashSet<&AnalysisId> = analysis_ids.iter().collect();
        Ok(self.with_tables(|t| {
            t.summaries
                .iter()
                .filter(|s| wanted.contains(&s.analysis_id))
                .cloned()
                .collect()
        }))
    }

    async fn list_forecasts(&self, analysis_ids: &[AnalysisId]) -> ServiceResult<Vec<Forecast>> {
        self.enter(ServiceOp::ListForecasts)?;
        let wanted: HashSet<&AnalysisId> = analysis_ids.iter().collect();
        Ok(self.with_tables(|t| {
            t.forecasts
                .iter()
                .filter(|f| wanted.contains(&f.analysis_id))
                .cloned()
                .collect()
        }))
    }

    async fn get_upload(&self, id: &UploadId) -> ServiceResult<Option<Upload>> {
        self.enter(ServiceOp::GetUpload)?;
        Ok(self.with_tables(|t| t.uploads.iter().find(|u| &u.id == id).cloned()))
    }

    async fn insert_upload(&self, upload: NewUpload) -> ServiceResult<Upload> {
        self.enter(ServiceOp::InsertUpload)?;
        let row = upload.into_upload();
        self.with_tables(|t| t.uploads.push(row.clone()));
        Ok(row)
    }

    async fn update_upload(&self, upload: &Upload) -> ServiceResult<()> {
        self.enter(ServiceOp::UpdateUpload)?;
        self.with_tables(|t| match t.uploads.iter_mut().find(|u| u.id == upload.id) {
            Some(existing) => {
                *existing = upload.clone();
                Ok(())
            }
            None => Err(ServiceError::NotFound(format!("upload {}", upload.id))),
        })
    }

    async fn delete_upload(&self, id: &UploadId) -> ServiceResult<bool> {
        self.enter(ServiceOp::DeleteUpload)?;
        let cascade = self.cascade_deletes;
        Ok(self.with_tables(|t| {
            let before = t.uploads.len();
            t.uploads.retain(|u| &u.id != id);
            let removed = t.uploads.len() != before;
            if removed && cascade {
                let orphaned: HashSet<AnalysisId> = t
                    .analyses
                    .iter()
                    .filter(|a| &a.upload_id == id)
                    .map(|a| a.id.clone())
                    .collect();
                t.analyses.retain(|a| !orphaned.contains(&a.id));
                t.summaries.retain(|s| !orphaned.contains(&s.analysis_id));
                t.forecasts.retain(|f| !orphaned.contains(&f.analysis_id));
            }
            removed
        }))
    }

    async fn insert_analysis(&self, analysis: &Analysis) -> ServiceResult<()> {
        self.enter(ServiceOp::InsertAnalysis)?;
        self.with_tables(|t| t.analyses.push(analysis.clone()));
        Ok(())
    }

    async fn insert_summary(&self, summary: &Summary) -> ServiceResult<()> {
        self.enter(ServiceOp::InsertSummary)?;
        self.with_tables(|t| t.summaries.push(summary.clone()));
        Ok(())
    }

    async fn insert_forecast(&self, forecast: &Forecast) -> ServiceResult<()> {
        self.enter(ServiceOp::InsertForecast)?;
        self.with_tables(|t| t.forecasts.push(forecast.clone()));
        Ok(())
    }
}
