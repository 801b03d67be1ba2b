//! Cascade synchronization
//!
//! - `run`: run ids and the per-stage claim ledger
//! - `dag`: typed node graph with value-compared input key sets
//! - `report`: per-level outcome of a run
//! - `cascade`: the synchronizer itself

mod cascade;
mod dag;
mod report;
mod run;

pub use cascade::CascadeSynchronizer;
pub use dag::{CascadeDag, KeySet, NodeKind};
pub use report::{CascadeReport, StageOutcome, SyncMode};
pub use run::{RunClock, RunId, StageLedger};
