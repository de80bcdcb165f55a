//! Snapshot iterator shared by all index backends

use crate::data::LogRecordPos;

use super::IndexIterator;

/// Ordered copy of `(key, position)` pairs with a cursor
pub struct SnapshotIterator {
    /// Ascending, or descending when `reverse`
    items: Vec<(Vec<u8>, LogRecordPos)>,
    cursor: usize,
    reverse: bool,
}

impl SnapshotIterator {
    /// Wrap `items`, which must already be sorted in traversal order
    pub fn new(items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        Self {
            items,
            cursor: 0,
            reverse,
        }
    }

    /// Build from an ascending sequence, flipping it for reverse traversal
    pub fn from_ascending(mut items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        if reverse {
            items.reverse();
        }
        Self::new(items, reverse)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.cursor = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.cursor += 1;
    }

    fn valid(&self) -> bool {
        self.cursor < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.cursor].0
    }

    fn value(&self) -> LogRecordPos {
        self.items[self.cursor].1
    }

    fn close(&mut self) {
        self.items = Vec::new();
        self.cursor = 0;
    }
}
