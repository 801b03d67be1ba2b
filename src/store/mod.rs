//! ResourceStore: the four cached collections
//!
//! A pure keyed-collection holder. Levels are replaced wholesale, never
//! merged, except through the explicit single-record `upsert`. The store
//! carries no business rules; the synchronizer and the mutation coordinator
//! decide what to write.

mod collection;
mod events;
mod level;

pub use collection::Collection;
pub use events::StoreEvent;
pub use level::{Level, LevelData, LevelRecord, LevelStatus};

use crate::model::{Analysis, AnalysisId, Forecast, Summary, Upload, UploadId};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default)]
struct Levels {
    uploads: Collection<Upload>,
    analyses: Collection<Analysis>,
    summaries: Collection<Summary>,
    forecasts: Collection<Forecast>,
    status: HashMap<Level, LevelStatus>,
}

/// A consistent copy of all four levels taken at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub uploads: Vec<Upload>,
    pub analyses: Vec<Analysis>,
    pub summaries: Vec<Summary>,
    pub forecasts: Vec<Forecast>,
}

impl StoreSnapshot {
    pub fn len(&self, level: Level) -> usize {
        match level {
            Level::Uploads => self.uploads.len(),
            Level::Analyses => self.analyses.len(),
            Level::Summaries => self.summaries.len(),
            Level::Forecasts => self.forecasts.len(),
        }
    }
}

/// Mutable view of the store handed to `ResourceStore::transaction`.
///
/// Everything done through one transaction becomes visible at once.
pub struct StoreTxn<'a> {
    levels: &'a mut Levels,
    events: Vec<StoreEvent>,
}

impl StoreTxn<'_> {
    pub fn uploads(&self) -> &Collection<Upload> {
        &self.levels.uploads
    }

    pub fn analyses(&self) -> &Collection<Analysis> {
        &self.levels.analyses
    }

    pub fn summaries(&self) -> &Collection<Summary> {
        &self.levels.summaries
    }

    pub fn forecasts(&self) -> &Collection<Forecast> {
        &self.levels.forecasts
    }

    /// Replace the entire collection of the level `data` belongs to.
    pub fn set_level(&mut self, data: LevelData) {
        let level = data.level();
        let len = data.len();
        match data {
            LevelData::Uploads(v) => self.levels.uploads.replace(v),
            LevelData::Analyses(v) => self.levels.analyses.replace(v),
            LevelData::Summaries(v) => self.levels.summaries.replace(v),
            LevelData::Forecasts(v) => self.levels.forecasts.replace(v),
        }
        self.events.push(StoreEvent::LevelReplaced { level, len });
    }

    pub fn clear_level(&mut self, level: Level) {
        match level {
            Level::Uploads => self.levels.uploads.clear(),
            Level::Analyses => self.levels.analyses.clear(),
            Level::Summaries => self.levels.summaries.clear(),
            Level::Forecasts => self.levels.forecasts.clear(),
        }
        self.events.push(StoreEvent::LevelCleared { level });
    }

    /// Merge one record into its level.
    pub fn upsert(&mut self, record: LevelRecord) {
        let level = record.level();
        let id = record.id().to_string();
        match record {
            LevelRecord::Upload(r) => self.levels.uploads.upsert(r),
            LevelRecord::Analysis(r) => self.levels.analyses.upsert(r),
            LevelRecord::Summary(r) => self.levels.summaries.upsert(r),
            LevelRecord::Forecast(r) => self.levels.forecasts.upsert(r),
        };
        self.events.push(StoreEvent::RecordUpserted { level, id });
    }

    pub fn status(&self, level: Level) -> LevelStatus {
        self.levels.status.get(&level).cloned().unwrap_or_default()
    }

    /// Set a level's status; no event fires when nothing changed.
    pub fn set_status(&mut self, level: Level, status: LevelStatus) {
        if self.status(level) == status {
            return;
        }
        self.levels.status.insert(level, status.clone());
        self.events.push(StoreEvent::StatusChanged { level, status });
    }

    /// Flag a level as loading, keeping any previous error visible.
    pub fn mark_loading(&mut self, level: Level) {
        let mut status = self.status(level);
        status.loading = true;
        self.set_status(level, status);
    }

    /// Flag a level as settled, optionally leaving its error in place.
    pub fn mark_idle(&mut self, level: Level) {
        let mut status = self.status(level);
        status.loading = false;
        self.set_status(level, status);
    }

    pub fn mark_ready(&mut self, level: Level) {
        self.set_status(level, LevelStatus::ready());
    }

    pub fn mark_failed(&mut self, level: Level, error: impl Into<String>) {
        self.set_status(level, LevelStatus::failed(error));
    }

    /// Empty every level and forget every status.
    pub fn reset(&mut self) {
        self.levels.uploads.clear();
        self.levels.analyses.clear();
        self.levels.summaries.clear();
        self.levels.forecasts.clear();
        self.levels.status.clear();
        self.events.push(StoreEvent::Reset);
    }
}

/// Holds the four typed collections and their statuses.
#[derive(Debug)]
pub struct ResourceStore {
    inner: RwLock<Levels>,
    events: broadcast::Sender<StoreEvent>,
}

impl ResourceStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Levels::default()),
            events,
        }
    }

    /// Apply several changes atomically.
    ///
    /// Events produced inside `f` are published after the write lock is
    /// released. `f` must not call back into the store.
    pub fn transaction<R>(&self, f: impl FnOnce(&mut StoreTxn<'_>) -> R) -> R {
        let (result, events) = {
            let mut levels = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            let mut txn = StoreTxn {
                levels: &mut *levels,
                events: Vec::new(),
            };
            let result = f(&mut txn);
            (result, txn.events)
        };
        for event in events {
            // No receivers is fine: nobody is listening yet.
            let _ = self.events.send(event);
        }
        result
    }

    /// Replace the entire collection for one level.
    pub fn set_level(&self, data: LevelData) {
        self.transaction(|txn| txn.set_level(data));
    }

    pub fn clear_level(&self, level: Level) {
        self.transaction(|txn| txn.clear_level(level));
    }

    /// Merge a single known-new record. Reserved for the fast-path upsert.
    pub fn upsert(&self, record: LevelRecord) {
        self.transaction(|txn| txn.upsert(record));
    }

    /// Empty every level and forget every status.
    pub fn reset(&self) {
        self.transaction(|txn| txn.reset());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn read<R>(&self, f: impl FnOnce(&Levels) -> R) -> R {
        let levels = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&levels)
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.read(|l| l.uploads.as_slice().to_vec())
    }

    pub fn analyses(&self) -> Vec<Analysis> {
        self.read(|l| l.analyses.as_slice().to_vec())
    }

    pub fn summaries(&self) -> Vec<Summary> {
        self.read(|l| l.summaries.as_slice().to_vec())
    }

    pub fn forecasts(&self) -> Vec<Forecast> {
        self.read(|l| l.forecasts.as_slice().to_vec())
    }

    pub fn upload(&self, id: &UploadId) -> Option<Upload> {
        self.read(|l| l.uploads.get(id).cloned())
    }

    pub fn upload_ids(&self) -> Vec<UploadId> {
        self.read(|l| l.uploads.keys().cloned().collect())
    }

    pub fn analysis_ids(&self) -> Vec<AnalysisId> {
        self.read(|l| l.analyses.keys().cloned().collect())
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.read(|l| StoreSnapshot {
            uploads: l.uploads.as_slice().to_vec(),
            analyses: l.analyses.as_slice().to_vec(),
            summaries: l.summaries.as_slice().to_vec(),
            forecasts: l.forecasts.as_slice().to_vec(),
        })
    }

    pub fn status(&self, level: Level) -> LevelStatus {
        self.read(|l| l.status.get(&level).cloned().unwrap_or_default())
    }
}

impl Default for ResourceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewUpload, ProjectId, Sentiment, UploadSource};
    use chrono::Utc;

    fn upload(project: &str, text: &str) -> Upload {
        NewUpload::new(ProjectId::from(project), UploadSource::Manual, text).into_upload()
    }

    fn analysis(upload: &Upload) -> Analysis {
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

    #[test]
    fn set_level_replaces_rather_than_merges() {
        let store = ResourceStore::new();
        store.set_level(LevelData::Uploads(vec![upload("p1", "a"), upload("p1", "b")]));
        store.set_level(LevelData::Uploads(vec![upload("p2", "c")]));

        let uploads = store.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].project_id.as_str(), "p2");
    }

    #[test]
    fn clear_level_leaves_other_levels_alone() {
        let store = ResourceStore::new();
        let u = upload("p1", "a");
        store.set_level(LevelData::Analyses(vec![analysis(&u)]));
        store.set_level(LevelData::Uploads(vec![u]));

        store.clear_level(Level::Analyses);
        assert!(store.analyses().is_empty());
        assert_eq!(store.uploads().len(), 1);
    }

    #[test]
    fn upsert_merges_single_record() {
        let store = ResourceStore::new();
        let u = upload("p1", "a");
        let first = analysis(&u);
        store.set_level(LevelData::Analyses(vec![first.clone()]));

        let second = analysis(&u);
        store.upsert(LevelRecord::Analysis(second.clone()));
        assert_eq!(store.analysis_ids(), vec![first.id, second.id]);
    }

    #[test]
    fn transaction_publishes_events_in_order() {
        let store = ResourceStore::new();
        let mut rx = store.subscribe();

        store.transaction(|txn| {
            txn.set_level(LevelData::Uploads(vec![upload("p1", "a")]));
            txn.clear_level(Level::Analyses);
            txn.mark_ready(Level::Uploads);
            txn.mark_loading(Level::Uploads);
        });

        assert_eq!(rx.try_recv().unwrap(), StoreEvent::LevelReplaced { level: Level::Uploads, len: 1 });
        assert_eq!(rx.try_recv().unwrap(), StoreEvent::LevelCleared { level: Level::Analyses });
        // mark_ready on a fresh level is a no-op, so only the loading flip is reported
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreEvent::StatusChanged {
                level: Level::Uploads,
                status: LevelStatus { loading: true, error: None },
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn loading_keeps_previous_error_until_success() {
        let store = ResourceStore::new();
        store.transaction(|txn| txn.mark_failed(Level::Analyses, "boom"));
        store.transaction(|txn| txn.mark_loading(Level::Analyses));

        let status = store.status(Level::Analyses);
        assert!(status.loading);
        assert_eq!(status.error.as_deref(), Some("boom"));

        store.transaction(|txn| txn.mark_ready(Level::Analyses));
        assert_eq!(store.status(Level::Analyses), LevelStatus::ready());
    }

    #[test]
    fn reset_empties_everything() {
        let store = ResourceStore::new();
        store.set_level(LevelData::Uploads(vec![upload("p1", "a")]));
        store.transaction(|txn| txn.mark_failed(Level::Summaries, "x"));

        store.reset();
        assert_eq!(store.snapshot(), StoreSnapshot::default());
        assert_eq!(store.status(Level::Summaries), LevelStatus::ready());
    }
}
