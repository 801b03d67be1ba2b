//! Key-indexed collection backing each store level

use crate::model::Keyed;
use std::collections::HashMap;

/// Records of one level, in the order the service returned them, indexed by key.
#[derive(Debug, Clone)]
pub struct Collection<T: Keyed> {
    records: Vec<T>,
    index: HashMap<T::Key, usize>,
}

impl<T: Keyed> Collection<T> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Replace every record. A key repeated in `records` keeps its last value.
    pub fn replace(&mut self, records: Vec<T>) {
        self.clear();
        for record in records {
            self.upsert(record);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }

    /// Insert or overwrite a single record. Returns true if the key was new.
    pub fn upsert(&mut self, record: T) -> bool {
        match self.index.get(record.key()) {
            Some(&pos) => {
                self.records[pos] = record;
                false
            }
            None => {
                self.index.insert(record.key().clone(), self.records.len());
                self.records.push(record);
                true
            }
        }
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.index.get(key).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.index.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &T::Key> {
        self.records.iter().map(|r| r.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl<T: Keyed> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}
