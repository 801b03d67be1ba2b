//! Change notifications published by the store
//!
//! One event per observable mutation, sent after the lock is released so a
//! subscriber reading a snapshot never sees a half-applied transaction.

use super::level::{Level, LevelStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A level was replaced wholesale
    LevelReplaced { level: Level, len: usize },
    /// A level was emptied
    LevelCleared { level: Level },
    /// A single record was merged into a level (fast-path upsert)
    RecordUpserted { level: Level, id: String },
    /// A level's `{loading, error}` state changed
    StatusChanged { level: Level, status: LevelStatus },
    /// Every level and status was reset (project or user change)
    Reset,
}

impl StoreEvent {
    /// The level this event concerns, if any
    pub fn level(&self) -> Option<Level> {
        match self {
            Self::LevelReplaced { level, .. }
            | Self::LevelCleared { level }
            | Self::RecordUpserted { level, .. }
            | Self::StatusChanged { level, .. } => Some(*level),
            Self::Reset => None,
        }
    }
}
