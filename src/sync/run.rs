//! Run ids and the per-stage claim ledger
//!
//! Every cascade invocation draws a fresh run id. A run claims each stage
//! as it enters it; only the holder of the latest claim may commit.
//! Superseded runs are not cancelled, their results are dropped on arrival.

use crate::store::Level;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic cascade run identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(u64);

impl RunId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Hands out strictly increasing run ids.
#[derive(Debug, Default)]
pub struct RunClock {
    last: AtomicU64,
}

impl RunClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> RunId {
        RunId(self.last.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The most recently issued id (zero before the first run)
    pub fn latest(&self) -> RunId {
        RunId(self.last.load(Ordering::SeqCst))
    }
}

/// Latest claim per stage.
#[derive(Debug, Default)]
pub struct StageLedger {
    latest: DashMap<Level, RunId>,
}

impl StageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `run` as the latest run for `level`.
    ///
    /// Returns false, leaving the ledger untouched, when a newer run already
    /// holds the stage.
    pub fn claim(&self, level: Level, run: RunId) -> bool {
        let mut entry = self.latest.entry(level).or_insert(run);
        if *entry > run {
            return false;
        }
        *entry = run;
        true
    }

    /// True if `run` still holds the latest claim on `level`.
    pub fn is_current(&self, level: Level, run: RunId) -> bool {
        self.latest.get(&level).map(|r| *r == run).unwrap_or(false)
    }

    /// Claim every stage at once, superseding all runs older than `run`.
    pub fn supersede_all(&self, run: RunId) {
        for level in Level::ALL {
            self.claim(level, run);
        }
    }

    pub fn holder(&self, level: Level) -> Option<RunId> {
        self.latest.get(&level).map(|r| *r)
    }
}
