//! The four-stage cascade: Project → Uploads → Analyses → {Summaries, Forecasts}
//!
//! Each stage claims itself in the ledger with the run id before fetching
//! and commits only if, at commit time, the run still holds that claim and
//! the parent key set it fetched for is still the one in the store. Commits
//! go through a single store transaction, so a parent level and the
//! restriction of its dependents become visible together, and the DAG
//! input of a stage is recorded under the same store lock as its commit.

use super::dag::{CascadeDag, KeySet, NodeKind};
use super::report::{CascadeReport, StageOutcome, SyncMode};
use super::run::{RunClock, RunId, StageLedger};
use crate::model::{Dependent, Project, ProjectId, UploadId};
use crate::persistence::{ResourceService, ServiceError, ServiceResult};
use crate::store::{Collection, Level, LevelData, LevelRecord, ResourceStore, StoreTxn};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Result of trying to commit a fetched level
enum Commit {
    Done(usize),
    Stale,
}

/// Drives cascade runs against one store.
pub struct CascadeSynchronizer {
    service: Arc<dyn ResourceService>,
    store: Arc<ResourceStore>,
    clock: RunClock,
    ledger: StageLedger,
    dag: Mutex<CascadeDag>,
    root: RwLock<Option<ProjectId>>,
}

impl CascadeSynchronizer {
    pub fn new(service: Arc<dyn ResourceService>, store: Arc<ResourceStore>) -> Self {
        Self {
            service,
            store,
            clock: RunClock::new(),
            ledger: StageLedger::new(),
            dag: Mutex::new(CascadeDag::new()),
            root: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }

    /// The project currently rooting the cascade
    pub fn active_project(&self) -> Option<ProjectId> {
        self.root.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Point the cascade at a new root.
    ///
    /// An inactive project counts as no project. When the root changes, every
    /// in-flight run is superseded and the store and graph are reset. Returns
    /// true if the root changed.
    pub fn activate(&self, project: Option<&Project>) -> bool {
        let next = project.filter(|p| p.active).map(|p| p.id.clone());
        let fenced = self.store.transaction(|txn| {
            let mut root = self.root.write().unwrap_or_else(PoisonError::into_inner);
            if *root == next {
                return None;
            }
            *root = next.clone();

            let fence = self.clock.next();
            self.ledger.supersede_all(fence);
            let mut dag = self.dag();
            dag.reset();
            if let Some(id) = &next {
                dag.record_commit(NodeKind::Project, KeySet::of([id]));
            }
            txn.reset();
            Some(fence)
        });

        match fenced {
            Some(fence) => {
                info!(project = ?next.as_ref().map(|p| p.as_str()), %fence, "cascade root changed");
                true
            }
            None => false,
        }
    }

    /// Merge freshly created records into the active project's levels.
    ///
    /// Every level below uploads is claimed with a new run id first, so a
    /// run that fetched before the records existed cannot overwrite them,
    /// and those levels stop reporting as loading.
    /// Nothing is merged unless `project` is the root and each record's
    /// parent is cached or part of the batch. Returns the claiming run.
    pub fn merge(&self, project: &ProjectId, records: Vec<LevelRecord>) -> Option<RunId> {
        let merged = self.store.transaction(|txn| {
            if !self.is_root(project) || !parents_present(txn, &records) {
                return None;
            }
            let run = self.clock.next();
            for level in Level::Uploads.downstream() {
                // Any fetch in flight on this level is now discarded on arrival
                if self.ledger.claim(*level, run) {
                    txn.mark_idle(*level);
                }
            }
            for record in records {
                txn.upsert(record);
            }
            Some(run)
        });
        match merged {
            Some(run) => debug!(%run, project = %project, "records merged ahead of the re-sync"),
            None => debug!(project = %project, "merge skipped; parent not cached"),
        }
        merged
    }

    /// The input key set `node` last committed with, if any.
    pub fn committed_input(&self, node: NodeKind) -> Option<KeySet> {
        self.dag().committed_input(node).cloned()
    }

    /// Force `node` and its descendants to refetch on the next run.
    pub fn invalidate(&self, node: NodeKind) {
        self.dag().invalidate(node);
    }

    /// Run the cascade for the active project, if there is one.
    pub async fn refresh(&self, mode: SyncMode) -> Option<CascadeReport> {
        let project = self.active_project()?;
        Some(self.run(&project, mode).await)
    }

    /// Run the cascade for `project`.
    ///
    /// A project other than the active root is left alone and every level
    /// reports `Inactive`.
    pub async fn run(&self, project: &ProjectId, mode: SyncMode) -> CascadeReport {
        let run = self.clock.next();
        let mut report = CascadeReport::new(run, project.clone(), mode);

        if !self.is_root(project) {
            debug!(%run, project = %project, "project is not the cascade root; skipping");
            report.set_all(StageOutcome::Inactive);
            return report;
        }
        debug!(%run, project = %project, ?mode, "cascade run started");

        // Stage 1: uploads of the project
        let upload_keys = match self.sync_uploads(run, project).await {
            Ok(keys) => {
                report.set(Level::Uploads, StageOutcome::Committed { records: keys.len() });
                keys
            }
            Err(outcome) => {
                report.set(Level::Uploads, outcome);
                return self.finish(report);
            }
        };

        // Stage 2: empty key set short-circuits the rest
        if upload_keys.is_empty() {
            for level in Level::Uploads.downstream() {
                report.set(*level, StageOutcome::EmptyParent);
            }
            return self.finish(report);
        }

        // Stage 3: analyses of those uploads
        let needs_analyses = self.dag().needs_run(NodeKind::Analysis, &upload_keys, mode);
        if needs_analyses {
            let upload_ids: Vec<UploadId> = upload_keys.iter().map(UploadId::from).collect();
            let outcome = self
                .sync_dependents(
                    run,
                    Level::Analyses,
                    &upload_keys,
                    self.service.list_analyses(&upload_ids),
                    LevelData::Analyses,
                    Some(NodeKind::Analysis),
                )
                .await;
            let committed = matches!(outcome, StageOutcome::Committed { .. });
            report.set(Level::Analyses, outcome);
            if !committed {
                return self.finish(report);
            }
        } else {
            report.set(Level::Analyses, StageOutcome::Unchanged);
        }

        // Stage 4: summaries and forecasts, concurrently
        let analysis_ids = self.store.analysis_ids();
        let analysis_keys = KeySet::of(&analysis_ids);

        if analysis_keys.is_empty() {
            let outcome = self.clear_leaves(run);
            report.set(Level::Summaries, outcome.clone());
            report.set(Level::Forecasts, outcome);
            return self.finish(report);
        }

        let needs_leaves = self.dag().needs_run(NodeKind::SummaryForecast, &analysis_keys, mode);
        if !needs_leaves {
            report.set(Level::Summaries, StageOutcome::Unchanged);
            report.set(Level::Forecasts, StageOutcome::Unchanged);
            return self.finish(report);
        }

        let (summaries, forecasts) = tokio::join!(
            self.sync_dependents(
                run,
                Level::Summaries,
                &analysis_keys,
                self.service.list_summaries(&analysis_ids),
                LevelData::Summaries,
                None,
            ),
            self.sync_dependents(
                run,
                Level::Forecasts,
                &analysis_keys,
                self.service.list_forecasts(&analysis_ids),
                LevelData::Forecasts,
                None,
            ),
        );
        if matches!(summaries, StageOutcome::Committed { .. })
            && matches!(forecasts, StageOutcome::Committed { .. })
        {
            self.record_input(run, NodeKind::SummaryForecast, analysis_keys);
        }
        report.set(Level::Summaries, summaries);
        report.set(Level::Forecasts, forecasts);
        self.finish(report)
    }

    /// Stage 1. Returns the committed upload key set.
    async fn sync_uploads(&self, run: RunId, project: &ProjectId) -> Result<KeySet, StageOutcome> {
        if !self.enter(Level::Uploads, run) {
            return Err(StageOutcome::Superseded);
        }

        let mut uploads = match self.service.list_uploads(project).await {
            Ok(uploads) => uploads,
            Err(e) => return Err(self.fail(Level::Uploads, run, &e)),
        };
        let fetched = uploads.len();
        uploads.retain(|u| &u.project_id == project);
        if uploads.len() != fetched {
            warn!(%run, dropped = fetched - uploads.len(), "service returned uploads of another project");
        }

        let committed = self.store.transaction(|txn| {
            if !self.ledger.is_current(Level::Uploads, run) || !self.is_root(project) {
                return None;
            }
            txn.set_level(LevelData::Uploads(uploads));
            txn.mark_ready(Level::Uploads);
            restrict_dependents(txn, Level::Uploads);

            let mut dag = self.dag();
            dag.record_commit(NodeKind::Upload, KeySet::of([project]));
            let keys = level_keys(txn, Level::Uploads);
            if keys.is_empty() {
                let mut claimed = Vec::new();
                for level in Level::Uploads.downstream() {
                    if self.ledger.claim(*level, run) {
                        txn.clear_level(*level);
                        txn.mark_ready(*level);
                        claimed.push(*level);
                    }
                }
                if claimed.contains(&Level::Analyses) {
                    dag.record_commit(NodeKind::Analysis, KeySet::empty());
                }
                if claimed.contains(&Level::Summaries) && claimed.contains(&Level::Forecasts) {
                    dag.record_commit(NodeKind::SummaryForecast, KeySet::empty());
                }
            }
            Some(keys)
        });

        match committed {
            Some(keys) => {
                if keys.is_empty() {
                    info!(%run, project = %project, "no uploads; dependent levels cleared");
                } else {
                    info!(%run, level = %Level::Uploads, records = keys.len(), "level committed");
                }
                Ok(keys)
            }
            None => {
                self.release(Level::Uploads, run);
                debug!(%run, level = %Level::Uploads, "result superseded; discarded");
                Err(StageOutcome::Superseded)
            }
        }
    }

    /// Stages 3 and 4: fetch a dependent level for `parents` and commit it.
    async fn sync_dependents<T, F>(
        &self,
        run: RunId,
        level: Level,
        parents: &KeySet,
        fetch: F,
        wrap: fn(Vec<T>) -> LevelData,
        node: Option<NodeKind>,
    ) -> StageOutcome
    where
        T: Dependent,
        F: Future<Output = ServiceResult<Vec<T>>>,
    {
        if !self.enter(level, run) {
            return StageOutcome::Superseded;
        }

        let mut records = match fetch.await {
            Ok(records) => records,
            Err(e) => return self.fail(level, run, &e),
        };
        let fetched = records.len();
        records.retain(|r| parents.contains(r.parent_key().as_ref()));
        if records.len() != fetched {
            warn!(%run, %level, dropped = fetched - records.len(), "service returned records outside the key set");
        }

        let parent = parent_level(level);
        let committed = self.store.transaction(|txn| {
            if !self.ledger.is_current(level, run) || level_keys(txn, parent) != *parents {
                return Commit::Stale;
            }
            let count = records.len();
            txn.set_level(wrap(records));
            txn.mark_ready(level);
            restrict_dependents(txn, level);
            if let Some(node) = node {
                self.dag().record_commit(node, parents.clone());
            }
            Commit::Done(count)
        });

        match committed {
            Commit::Done(records) => {
                info!(%run, %level, records, "level committed");
                StageOutcome::Committed { records }
            }
            Commit::Stale => {
                self.release(level, run);
                debug!(%run, %level, "result superseded; discarded");
                StageOutcome::Superseded
            }
        }
    }

    /// Stage 4 with no analyses: clear both leaves without a fetch.
    fn clear_leaves(&self, run: RunId) -> StageOutcome {
        let cleared = self.store.transaction(|txn| {
            if !level_keys(txn, Level::Analyses).is_empty() {
                return false;
            }
            let mut claimed = 0;
            for level in Level::Analyses.downstream() {
                if self.ledger.claim(*level, run) {
                    txn.clear_level(*level);
                    txn.mark_ready(*level);
                    claimed += 1;
                }
            }
            if claimed == Level::Analyses.downstream().len() {
                self.dag().record_commit(NodeKind::SummaryForecast, KeySet::empty());
            }
            claimed > 0
        });
        if cleared {
            debug!(%run, "no analyses; summaries and forecasts cleared");
            StageOutcome::EmptyParent
        } else {
            StageOutcome::Superseded
        }
    }

    /// Record the input of `node` if `run` still holds each of its levels
    /// and the parent level still carries `input`.
    fn record_input(&self, run: RunId, node: NodeKind, input: KeySet) -> bool {
        let recorded = self.store.transaction(|txn| {
            let levels = node.levels();
            let Some(first) = levels.first() else {
                return false;
            };
            if !levels.iter().all(|l| self.ledger.is_current(*l, run))
                || level_keys(txn, parent_level(*first)) != input
            {
                return false;
            }
            self.dag().record_commit(node, input);
            true
        });
        if !recorded {
            debug!(%run, ?node, "newer run owns the node; input not recorded");
        }
        recorded
    }

    /// Claim `level` for `run` and flag it loading.
    fn enter(&self, level: Level, run: RunId) -> bool {
        self.store.transaction(|txn| {
            if !self.ledger.claim(level, run) {
                return false;
            }
            txn.mark_loading(level);
            true
        })
    }

    /// Record a fetch failure, if `run` still owns the level.
    fn fail(&self, level: Level, run: RunId, error: &ServiceError) -> StageOutcome {
        let message = error.to_string();
        let recorded = self.store.transaction(|txn| {
            if !self.ledger.is_current(level, run) {
                return false;
            }
            txn.mark_failed(level, message.clone());
            true
        });
        if recorded {
            warn!(%run, %level, error = %message, "stage failed; keeping last good value");
        } else {
            debug!(%run, %level, error = %message, "superseded stage failed");
        }
        StageOutcome::Failed(message)
    }

    /// Drop the loading flag of a discarded run that still holds the claim.
    fn release(&self, level: Level, run: RunId) {
        self.store.transaction(|txn| {
            if self.ledger.is_current(level, run) {
                txn.mark_idle(level);
            }
        });
    }

    fn finish(&self, report: CascadeReport) -> CascadeReport {
        debug!(run = %report.run, complete = report.is_complete(), "cascade run finished");
        report
    }

    fn is_root(&self, project: &ProjectId) -> bool {
        self.root
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            == Some(project)
    }

    fn dag(&self) -> MutexGuard<'_, CascadeDag> {
        self.dag.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parent_level(level: Level) -> Level {
    match level {
        Level::Uploads | Level::Analyses => Level::Uploads,
        Level::Summaries | Level::Forecasts => Level::Analyses,
    }
}

/// True if every record's parent is cached or arrives in the same batch.
fn parents_present(txn: &StoreTxn<'_>, records: &[LevelRecord]) -> bool {
    let batch = KeySet::of(records.iter().filter_map(|r| match r {
        LevelRecord::Analysis(a) => Some(a.id.as_str()),
        _ => None,
    }));
    records.iter().all(|record| match record {
        LevelRecord::Upload(_) => true,
        LevelRecord::Analysis(a) => txn.uploads().contains(&a.upload_id),
        LevelRecord::Summary(s) => {
            batch.contains(s.analysis_id.as_str()) || txn.analyses().contains(&s.analysis_id)
        }
        LevelRecord::Forecast(f) => {
            batch.contains(f.analysis_id.as_str()) || txn.analyses().contains(&f.analysis_id)
        }
    })
}

fn level_keys(txn: &StoreTxn<'_>, level: Level) -> KeySet {
    match level {
        Level::Uploads => KeySet::of(txn.uploads().keys()),
        Level::Analyses => KeySet::of(txn.analyses().keys()),
        Level::Summaries => KeySet::of(txn.summaries().keys()),
        Level::Forecasts => KeySet::of(txn.forecasts().keys()),
    }
}

/// The records of `collection` whose parent is in `parents`, or `None` if
/// nothing would be dropped.
fn owned_by<T: Dependent + Clone>(collection: &Collection<T>, parents: &KeySet) -> Option<Vec<T>> {
    if collection.iter().all(|r| parents.contains(r.parent_key().as_ref())) {
        return None;
    }
    Some(
        collection
            .iter()
            .filter(|r| parents.contains(r.parent_key().as_ref()))
            .cloned()
            .collect(),
    )
}

/// Drop dependents of `level` whose parent is no longer present, transitively.
fn restrict_dependents(txn: &mut StoreTxn<'_>, level: Level) {
    match level {
        Level::Uploads => {
            let keys = level_keys(txn, Level::Uploads);
            let kept = owned_by(txn.analyses(), &keys);
            if let Some(kept) = kept {
                txn.set_level(LevelData::Analyses(kept));
            }
            restrict_dependents(txn, Level::Analyses);
        }
        Level::Analyses => {
            let keys = level_keys(txn, Level::Analyses);
            let summaries = owned_by(txn.summaries(), &keys);
            if let Some(kept) = summaries {
                txn.set_level(LevelData::Summaries(kept));
            }
            let forecasts = owned_by(txn.forecasts(), &keys);
            if let Some(kept) = forecasts {
                txn.set_level(LevelData::Forecasts(kept));
            }
        }
        Level::Summaries | Level::Forecasts => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Analysis, AnalysisId, Forecast, ForecastId, ForecastSeries, NewUpload, Sentiment, Summary,
        SummaryId, Upload, UploadSource,
    };
    use crate::persistence::{MemoryService, ServiceOp};
    use crate::store::StoreSnapshot;
    use chrono::Utc;

    fn upload(project: &Project, text: &str) -> Upload {
        NewUpload::new(project.id.clone(), UploadSource::Manual, text).into_upload()
    }

    fn analysis(upload: &Upload) -> Analysis {
        Analysis {
            id: AnalysisId::new(),
            upload_id: upload.id.clone(),
            sentiment: Sentiment::Positive,
            sentiment_score: 0.7,
            dialect: "gulf".into(),
            dialect_confidence: 0.6,
            created_at: Utc::now(),
        }
    }

    fn summary(analysis: &Analysis) -> Summary {
        Summary {
            id: SummaryId::new(),
            analysis_id: analysis.id.clone(),
            summary_text: "short".into(),
            created_at: Utc::now(),
        }
    }

    fn forecast(analysis: &Analysis) -> Forecast {
        Forecast {
            id: ForecastId::new(),
            analysis_id: analysis.id.clone(),
            forecast_json: ForecastSeries::default(),
            forecast_period: 7,
            created_at: Utc::now(),
        }
    }

    struct Fixture {
        service: Arc<MemoryService>,
        cascade: CascadeSynchronizer,
        project: Project,
    }

    fn fixture() -> Fixture {
        let service = Arc::new(MemoryService::new());
        let project = Project::with_id(ProjectId::from("p1"), "news");
        service.add_project(project.clone());
        let cascade = CascadeSynchronizer::new(service.clone(), Arc::new(ResourceStore::new()));
        cascade.activate(Some(&project));
        Fixture {
            service,
            cascade,
            project,
        }
    }

    /// One upload with an analysis, a summary and a forecast.
    fn seed_chain(f: &Fixture) -> (Upload, Analysis) {
        let u = upload(&f.project, "hello");
        let a = analysis(&u);
        f.service.seed_upload(u.clone());
        f.service.seed_analysis(a.clone());
        f.service.seed_summary(summary(&a));
        f.service.seed_forecast(forecast(&a));
        (u, a)
    }

    #[tokio::test]
    async fn full_chain_lands_in_store() {
        let f = fixture();
        let (u, a) = seed_chain(&f);

        let report = f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        assert!(report.is_complete());

        let snapshot = f.cascade.store().snapshot();
        assert_eq!(snapshot.uploads, vec![u]);
        assert_eq!(snapshot.analyses, vec![a]);
        assert_eq!(snapshot.summaries.len(), 1);
        assert_eq!(snapshot.forecasts.len(), 1);
    }

    #[tokio::test]
    async fn second_run_is_idempotent_and_skips_unchanged_levels() {
        let f = fixture();
        seed_chain(&f);

        f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        let first = f.cascade.store().snapshot();
        f.service.reset_counts();

        let report = f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        assert_eq!(f.cascade.store().snapshot(), first);
        assert_eq!(report.outcome(Level::Analyses), &StageOutcome::Unchanged);
        assert_eq!(report.outcome(Level::Summaries), &StageOutcome::Unchanged);
        assert_eq!(f.service.call_count(ServiceOp::ListUploads), 1);
        assert_eq!(f.service.call_count(ServiceOp::ListAnalyses), 0);
    }

    #[tokio::test]
    async fn full_mode_refetches_every_level() {
        let f = fixture();
        seed_chain(&f);

        f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        f.service.reset_counts();
        let report = f.cascade.run(&f.project.id, SyncMode::Full).await;

        assert_eq!(report.fetched_levels(), Level::ALL.to_vec());
        assert_eq!(f.service.total_calls(), 4);
    }

    #[tokio::test]
    async fn empty_project_short_circuits_without_calls() {
        let f = fixture();

        let report = f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        assert!(report.is_complete());
        for level in Level::Uploads.downstream() {
            assert_eq!(report.outcome(*level), &StageOutcome::EmptyParent);
        }
        assert_eq!(f.service.call_count(ServiceOp::ListUploads), 1);
        assert_eq!(f.service.total_calls(), 1);
    }

    #[tokio::test]
    async fn upload_without_analyses_clears_leaves_without_calls() {
        let f = fixture();
        f.service.seed_upload(upload(&f.project, "lonely"));

        let report = f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        assert_eq!(report.outcome(Level::Analyses), &StageOutcome::Committed { records: 0 });
        assert_eq!(report.outcome(Level::Summaries), &StageOutcome::EmptyParent);
        assert_eq!(f.service.call_count(ServiceOp::ListSummaries), 0);
        assert_eq!(f.service.call_count(ServiceOp::ListForecasts), 0);
    }

    #[tokio::test]
    async fn failure_keeps_last_good_value_and_halts() {
        let f = fixture();
        let (u, a) = seed_chain(&f);
        f.cascade.run(&f.project.id, SyncMode::Incremental).await;

        f.service.seed_upload(upload(&f.project, "new"));
        f.service.fail_next(ServiceOp::ListAnalyses, "connection reset");
        f.service.reset_counts();
        let report = f.cascade.run(&f.project.id, SyncMode::Incremental).await;

        assert!(matches!(report.outcome(Level::Analyses), StageOutcome::Failed(_)));
        assert_eq!(report.outcome(Level::Summaries), &StageOutcome::NotReached);
        assert_eq!(f.service.call_count(ServiceOp::ListSummaries), 0);

        let store = f.cascade.store();
        assert_eq!(store.analyses(), vec![a]);
        assert!(store.uploads().contains(&u));
        let status = store.status(Level::Analyses);
        assert!(!status.loading);
        assert!(status.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn failed_uploads_leave_every_level_untouched() {
        let f = fixture();
        seed_chain(&f);
        f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        let before = f.cascade.store().snapshot();

        f.service.fail_next(ServiceOp::ListUploads, "offline");
        let report = f.cascade.run(&f.project.id, SyncMode::Full).await;

        assert!(matches!(report.outcome(Level::Uploads), StageOutcome::Failed(_)));
        assert_eq!(report.outcome(Level::Analyses), &StageOutcome::NotReached);
        assert_eq!(f.cascade.store().snapshot(), before);
        assert!(f.cascade.store().status(Level::Uploads).is_failed());
    }

    #[tokio::test]
    async fn next_success_clears_the_error() {
        let f = fixture();
        f.service.fail_next(ServiceOp::ListUploads, "offline");
        f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        assert!(f.cascade.store().status(Level::Uploads).is_failed());

        f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        assert!(!f.cascade.store().status(Level::Uploads).is_failed());
    }

    #[tokio::test]
    async fn inactive_project_is_not_synced() {
        let f = fixture();
        let report = f.cascade.run(&ProjectId::from("other"), SyncMode::Full).await;

        assert_eq!(report.outcome(Level::Uploads), &StageOutcome::Inactive);
        assert_eq!(f.service.total_calls(), 0);
    }

    #[tokio::test]
    async fn switching_root_resets_store() {
        let f = fixture();
        seed_chain(&f);
        f.cascade.run(&f.project.id, SyncMode::Incremental).await;

        let other = Project::with_id(ProjectId::from("p2"), "other");
        assert!(f.cascade.activate(Some(&other)));
        assert!(f.cascade.store().snapshot().uploads.is_empty());
        assert_eq!(f.cascade.active_project(), Some(other.id.clone()));

        assert!(!f.cascade.activate(Some(&other)));
        assert!(f.cascade.activate(Some(&other.clone().deactivated())));
        assert_eq!(f.cascade.active_project(), None);
        assert!(f.cascade.refresh(SyncMode::Incremental).await.is_none());
    }

    #[tokio::test]
    async fn removed_upload_takes_its_dependents_along() {
        let f = fixture();
        let (u1, a1) = seed_chain(&f);
        let u2 = upload(&f.project, "second");
        let a2 = analysis(&u2);
        f.service.seed_upload(u2.clone());
        f.service.seed_analysis(a2.clone());
        f.service.seed_summary(summary(&a2));
        f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        assert_eq!(f.cascade.store().summaries().len(), 2);

        f.service.delete_upload(&u2.id).await.unwrap();
        f.cascade.run(&f.project.id, SyncMode::Full).await;

        let snapshot = f.cascade.store().snapshot();
        assert_eq!(snapshot.uploads, vec![u1]);
        assert_eq!(snapshot.analyses, vec![a1.clone()]);
        assert!(snapshot.summaries.iter().all(|s| s.analysis_id == a1.id));
    }

    #[tokio::test]
    async fn merge_claims_every_level_below_uploads() {
        let f = fixture();
        let u = upload(&f.project, "fresh");
        f.service.seed_upload(u.clone());
        let before = f.cascade.run(&f.project.id, SyncMode::Incremental).await;

        let a = analysis(&u);
        let merged = f
            .cascade
            .merge(
                &f.project.id,
                vec![
                    LevelRecord::Analysis(a.clone()),
                    LevelRecord::Summary(summary(&a)),
                    LevelRecord::Forecast(forecast(&a)),
                ],
            )
            .unwrap();

        assert!(merged > before.run);
        for level in Level::Uploads.downstream() {
            assert_eq!(f.cascade.ledger.holder(*level), Some(merged));
        }
        assert_eq!(f.cascade.ledger.holder(Level::Uploads), Some(before.run));
        let snapshot = f.cascade.store().snapshot();
        assert_eq!(snapshot.analyses, vec![a]);
        assert_eq!(snapshot.summaries.len(), 1);
        assert_eq!(snapshot.forecasts.len(), 1);
    }

    #[tokio::test]
    async fn merge_needs_a_cached_parent() {
        let f = fixture();
        f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        let uncached = upload(&f.project, "not synced yet");
        let a = analysis(&uncached);

        let merged = f.cascade.merge(
            &f.project.id,
            vec![LevelRecord::Analysis(a.clone()), LevelRecord::Summary(summary(&a))],
        );
        assert!(merged.is_none());
        assert_eq!(f.cascade.store().snapshot(), StoreSnapshot::default());
    }

    #[tokio::test]
    async fn merge_ignores_projects_other_than_the_root() {
        let f = fixture();
        let (u, _) = seed_chain(&f);
        f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        let before = f.cascade.store().snapshot();

        let other = ProjectId::from("p2");
        assert!(f.cascade.merge(&other, vec![LevelRecord::Analysis(analysis(&u))]).is_none());
        assert_eq!(f.cascade.store().snapshot(), before);
    }

    #[tokio::test]
    async fn leaf_input_is_recorded_only_while_the_run_holds_both_leaves() {
        let f = fixture();
        seed_chain(&f);
        f.cascade.run(&f.project.id, SyncMode::Incremental).await;
        let keys = KeySet::of(f.cascade.store().analysis_ids());
        f.cascade.invalidate(NodeKind::SummaryForecast);

        let older = f.cascade.clock.next();
        let newer = f.cascade.clock.next();
        f.cascade.ledger.claim(Level::Summaries, older);
        f.cascade.ledger.claim(Level::Forecasts, older);
        f.cascade.ledger.claim(Level::Summaries, newer);

        assert!(!f.cascade.record_input(older, NodeKind::SummaryForecast, keys.clone()));
        assert!(!f.cascade.record_input(newer, NodeKind::SummaryForecast, keys.clone()));
        assert_eq!(f.cascade.committed_input(NodeKind::SummaryForecast), None);

        f.cascade.ledger.claim(Level::Forecasts, newer);
        assert!(f.cascade.record_input(newer, NodeKind::SummaryForecast, keys.clone()));
        assert_eq!(f.cascade.committed_input(NodeKind::SummaryForecast), Some(keys));
    }

    #[test]
    fn restriction_drops_orphans_transitively() {
        let store = ResourceStore::new();
        let project = Project::with_id(ProjectId::from("p1"), "x");
        let keep = upload(&project, "keep");
        let gone = upload(&project, "gone");
        let a_keep = analysis(&keep);
        let a_gone = analysis(&gone);

        store.transaction(|txn| {
            txn.set_level(LevelData::Uploads(vec![keep.clone(), gone.clone()]));
            txn.set_level(LevelData::Analyses(vec![a_keep.clone(), a_gone.clone()]));
            txn.set_level(LevelData::Summaries(vec![summary(&a_keep), summary(&a_gone)]));
            txn.set_level(LevelData::Forecasts(vec![forecast(&a_gone)]));
        });
        store.transaction(|txn| {
            txn.set_level(LevelData::Uploads(vec![keep.clone()]));
            restrict_dependents(txn, Level::Uploads);
        });

        let snapshot = store.snapshot();
        assert_eq!(snapshot.analyses, vec![a_keep.clone()]);
        assert_eq!(snapshot.summaries.len(), 1);
        assert_eq!(snapshot.summaries[0].analysis_id, a_keep.id);
        assert!(snapshot.forecasts.is_empty());
    }
}
