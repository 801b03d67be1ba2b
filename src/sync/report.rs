//! What a cascade run did, level by level

use super::run::RunId;
use crate::model::ProjectId;
use crate::store::Level;
use std::collections::BTreeMap;

/// How strictly a run compares key sets before refetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Skip dependent levels whose input key set did not change
    #[default]
    Incremental,
    /// Refetch every level regardless of key equality
    Full,
}

/// Outcome of one stage in one run
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Fetched and committed this many records
    Committed { records: usize },
    /// Input key set unchanged since the last commit; nothing fetched
    Unchanged,
    /// Parent key set empty; level cleared without a fetch
    EmptyParent,
    /// A newer run owns the stage; result dropped
    Superseded,
    /// Fetch failed; the level keeps its last good value
    Failed(String),
    /// An earlier stage stopped the run
    NotReached,
    /// The project is not the active cascade root
    Inactive,
}

impl StageOutcome {
    /// True for outcomes that leave the level consistent with this run
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Committed { .. } | Self::Unchanged | Self::EmptyParent)
    }
}

/// Per-level outcomes of a cascade run
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeReport {
    pub run: RunId,
    pub project: ProjectId,
    pub mode: SyncMode,
    outcomes: BTreeMap<Level, StageOutcome>,
}

impl CascadeReport {
    pub fn new(run: RunId, project: ProjectId, mode: SyncMode) -> Self {
        Self {
            run,
            project,
            mode,
            outcomes: Level::ALL
                .into_iter()
                .map(|level| (level, StageOutcome::NotReached))
                .collect(),
        }
    }

    pub fn set(&mut self, level: Level, outcome: StageOutcome) {
        self.outcomes.insert(level, outcome);
    }

    pub fn set_all(&mut self, outcome: StageOutcome) {
        for level in Level::ALL {
            self.set(level, outcome.clone());
        }
    }

    pub fn outcome(&self, level: Level) -> &StageOutcome {
        self.outcomes.get(&level).unwrap_or(&StageOutcome::NotReached)
    }

    /// Every level settled: the invariants hold for this run's snapshot.
    pub fn is_complete(&self) -> bool {
        self.outcomes.values().all(StageOutcome::is_settled)
    }

    /// Levels that failed, with their error text
    pub fn failures(&self) -> impl Iterator<Item = (Level, &str)> {
        self.outcomes.iter().filter_map(|(level, outcome)| match outcome {
            StageOutcome::Failed(msg) => Some((*level, msg.as_str())),
            _ => None,
        })
    }

    /// Levels refetched from the service in this run
    pub fn fetched_levels(&self) -> Vec<Level> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, StageOutcome::Committed { .. }))
            .map(|(level, _)| *level)
            .collect()
    }
}
