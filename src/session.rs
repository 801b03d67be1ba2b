//! SyncSession: the per-session context object
//!
//! Owns the store, the synchronizer and the mutation coordinator for one
//! authenticated session. Selecting a different project (or none) resets
//! every cached level before the new cascade starts.

use crate::analyze::{AnalyzeResponse, AnalyzeService};
use crate::gate::{Capability, TierToken};
use crate::model::{NewUpload, Project, ProjectId, Upload, UploadId};
use crate::mutation::{AnalyzeOptions, MutationCoordinator, MutationLimits, MutationOutcome, MutationResult};
use crate::persistence::ResourceService;
use crate::store::{Level, LevelStatus, ResourceStore, StoreEvent, StoreSnapshot};
use crate::sync::{CascadeReport, CascadeSynchronizer, SyncMode};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct SyncSession {
    store: Arc<ResourceStore>,
    cascade: Arc<CascadeSynchronizer>,
    mutations: MutationCoordinator,
}

impl SyncSession {
    pub fn new(
        service: Arc<dyn ResourceService>,
        analyzer: Arc<dyn AnalyzeService>,
        tier: watch::Receiver<TierToken>,
    ) -> Self {
        let store = Arc::new(ResourceStore::new());
        let cascade = Arc::new(CascadeSynchronizer::new(service.clone(), store.clone()));
        let mutations = MutationCoordinator::new(service, analyzer, cascade.clone(), tier);
        Self {
            store,
            cascade,
            mutations,
        }
    }

    pub fn with_limits(mut self, limits: MutationLimits) -> Self {
        self.mutations = self.mutations.with_limits(limits);
        self
    }

    // --- Project selection ---

    /// Make `project` the cascade root and sync it.
    ///
    /// `None` or an inactive project clears the session and syncs nothing.
    pub async fn select_project(&self, project: Option<Project>) -> Option<CascadeReport> {
        self.cascade.activate(project.as_ref());
        self.cascade.refresh(SyncMode::Incremental).await
    }

    pub fn current_project(&self) -> Option<ProjectId> {
        self.cascade.active_project()
    }

    /// Re-run the cascade for the current project.
    pub async fn refresh(&self, mode: SyncMode) -> Option<CascadeReport> {
        self.cascade.refresh(mode).await
    }

    /// Drop the current project and every cached record.
    pub fn reset(&self) {
        self.cascade.activate(None);
    }

    /// Follow a project-selection signal until its sender goes away.
    ///
    /// Each change re-roots the cascade at once, superseding in-flight runs,
    /// and starts the new run on its own task.
    pub fn spawn_listener(self: Arc<Self>, mut projects: watch::Receiver<Option<Project>>) -> JoinHandle<()> {
        let session = self;
        tokio::spawn(async move {
            loop {
                let project = projects.borrow_and_update().clone();
                session.cascade.activate(project.as_ref());
                if let Some(root) = session.cascade.active_project() {
                    let cascade = session.cascade.clone();
                    tokio::spawn(async move { cascade.run(&root, SyncMode::Incremental).await });
                }
                if projects.changed().await.is_err() {
                    debug!("project signal closed; listener stopping");
                    break;
                }
            }
        })
    }

    // --- Reads ---

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    pub fn status(&self, level: Level) -> LevelStatus {
        self.store.status(level)
    }

    pub fn statuses(&self) -> BTreeMap<Level, LevelStatus> {
        Level::ALL
            .into_iter()
            .map(|level| (level, self.store.status(level)))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    // --- Gate ---

    pub fn tier(&self) -> TierToken {
        self.mutations.tier()
    }

    pub fn can_perform(&self, capability: Capability) -> bool {
        self.mutations.can_perform(capability)
    }

    // --- Mutations ---

    pub async fn create_upload(&self, upload: NewUpload) -> MutationResult<MutationOutcome<Upload>> {
        self.mutations.create_upload(upload).await
    }

    pub async fn create_uploads_bulk(
        &self,
        uploads: Vec<NewUpload>,
    ) -> MutationResult<MutationOutcome<Vec<Upload>>> {
        self.mutations.create_uploads_bulk(uploads).await
    }

    pub async fn request_analysis(
        &self,
        upload_id: &UploadId,
        options: AnalyzeOptions,
    ) -> MutationResult<MutationOutcome<AnalyzeResponse>> {
        self.mutations.request_analysis(upload_id, options).await
    }

    pub async fn analyze_text(
        &self,
        project_id: &ProjectId,
        text: &str,
        options: AnalyzeOptions,
    ) -> MutationResult<MutationOutcome<AnalyzeResponse>> {
        self.mutations.analyze_text(project_id, text, options).await
    }

    pub async fn delete_upload(&self, upload_id: &UploadId) -> MutationResult<MutationOutcome<()>> {
        self.mutations.delete_upload(upload_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{sample_verdict, MockAnalyzer};
    use crate::model::UploadSource;
    use crate::persistence::MemoryService;
    use crate::sync::StageOutcome;

    fn session(service: &Arc<MemoryService>, tier: &str) -> (SyncSession, watch::Sender<TierToken>) {
        let (tier_tx, tier_rx) = watch::channel(TierToken::from(tier));
        let analyzer = Arc::new(MockAnalyzer::new(service.clone(), sample_verdict()));
        (SyncSession::new(service.clone(), analyzer, tier_rx), tier_tx)
    }

    fn seeded_service() -> (Arc<MemoryService>, Project, Project) {
        let service = Arc::new(MemoryService::new());
        let p1 = Project::with_id(ProjectId::from("p1"), "one");
        let p2 = Project::with_id(ProjectId::from("p2"), "two");
        for (project, text) in [(&p1, "alpha"), (&p1, "beta"), (&p2, "gamma")] {
            service.seed_upload(NewUpload::new(project.id.clone(), UploadSource::Manual, text).into_upload());
        }
        (service, p1, p2)
    }

    #[tokio::test]
    async fn selecting_a_project_syncs_it() {
        let (service, p1, _) = seeded_service();
        let (session, _tier) = session(&service, "free");

        let report = session.select_project(Some(p1.clone())).await.unwrap();
        assert_eq!(report.outcome(Level::Uploads), &StageOutcome::Committed { records: 2 });
        assert_eq!(session.current_project(), Some(p1.id));
        assert_eq!(session.snapshot().uploads.len(), 2);
    }

    #[tokio::test]
    async fn switching_projects_never_mixes_uploads() {
        let (service, p1, p2) = seeded_service();
        let (session, _tier) = session(&service, "free");

        session.select_project(Some(p1)).await;
        session.select_project(Some(p2.clone())).await;
        let uploads = session.snapshot().uploads;
        assert_eq!(uploads.len(), 1);
        assert!(uploads.iter().all(|u| u.project_id == p2.id));
    }

    #[tokio::test]
    async fn inactive_project_clears_the_session() {
        let (service, p1, _) = seeded_service();
        let (session, _tier) = session(&service, "free");
        session.select_project(Some(p1.clone())).await;

        assert!(session.select_project(Some(p1.deactivated())).await.is_none());
        assert_eq!(session.snapshot(), StoreSnapshot::default());
        assert_eq!(session.current_project(), None);
    }

    #[tokio::test]
    async fn gate_follows_the_tier_signal() {
        let service = Arc::new(MemoryService::new());
        let (session, tier) = session(&service, "free");
        assert!(!session.can_perform(Capability::BulkUpload));

        tier.send_replace(TierToken::from("enterprise"));
        assert!(session.can_perform(Capability::BulkUpload));
        assert_eq!(session.tier().as_str(), "enterprise");
    }

    #[tokio::test]
    async fn statuses_cover_every_level() {
        let (service, p1, _) = seeded_service();
        let (session, _tier) = session(&service, "free");
        session.select_project(Some(p1)).await;

        let statuses = session.statuses();
        assert_eq!(statuses.len(), 4);
        assert!(statuses.values().all(|s| !s.loading && s.error.is_none()));
    }
}
