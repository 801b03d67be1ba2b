//! Dependency graph of the cascade
//!
//! Four typed nodes: Project → Upload → Analysis → SummaryForecast. Each
//! node remembers the input key set of its last committed run and only
//! needs to run again when that set changes by value.

use super::report::SyncMode;
use crate::store::Level;
use std::collections::{BTreeSet, HashMap};

/// A value-comparable set of parent ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct KeySet(BTreeSet<String>);

impl KeySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of<K: AsRef<str>>(keys: impl IntoIterator<Item = K>) -> Self {
        Self(keys.into_iter().map(|k| k.as_ref().to_string()).collect())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Nodes of the cascade graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Project,
    Upload,
    Analysis,
    SummaryForecast,
}

impl NodeKind {
    pub const ALL: [NodeKind; 4] = [
        NodeKind::Project,
        NodeKind::Upload,
        NodeKind::Analysis,
        NodeKind::SummaryForecast,
    ];

    /// The node whose keys feed this one
    pub fn parent(&self) -> Option<NodeKind> {
        match self {
            Self::Project => None,
            Self::Upload => Some(Self::Project),
            Self::Analysis => Some(Self::Upload),
            Self::SummaryForecast => Some(Self::Analysis),
        }
    }

    /// Store levels this node writes
    pub fn levels(&self) -> &'static [Level] {
        match self {
            Self::Project => &[],
            Self::Upload => &[Level::Uploads],
            Self::Analysis => &[Level::Analyses],
            Self::SummaryForecast => &[Level::Summaries, Level::Forecasts],
        }
    }

    fn is_descendant_of(&self, ancestor: NodeKind) -> bool {
        let mut current = self.parent();
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = node.parent();
        }
        false
    }
}

/// Last committed input per node
#[derive(Debug, Default)]
pub struct CascadeDag {
    committed: HashMap<NodeKind, KeySet>,
}

impl CascadeDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `node` must run for `input`.
    pub fn needs_run(&self, node: NodeKind, input: &KeySet, mode: SyncMode) -> bool {
        match mode {
            SyncMode::Full => true,
            SyncMode::Incremental => self.committed.get(&node) != Some(input),
        }
    }

    pub fn record_commit(&mut self, node: NodeKind, input: KeySet) {
        self.committed.insert(node, input);
    }

    pub fn committed_input(&self, node: NodeKind) -> Option<&KeySet> {
        self.committed.get(&node)
    }

    /// Forget `node` and everything below it, forcing them to run next time.
    pub fn invalidate(&mut self, node: NodeKind) {
        self.committed
            .retain(|kind, _| *kind != node && !kind.is_descendant_of(node));
    }

    pub fn reset(&mut self) {
        self.committed.clear();
    }
}
