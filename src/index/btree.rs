//! Ordered-map index
//!
//! `BTreeMap` keyed by raw bytes (lexicographic order) wrapped in an RwLock
//! for concurrency.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::data::LogRecordPos;
use crate::error::Result;

use super::{IndexIterator, Indexer, SnapshotIterator};

/// BTreeMap-backed index
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, LogRecordPos>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().remove(key))
    }

    fn size(&self) -> Result<usize> {
        Ok(self.tree.read().len())
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let tree = self.tree.read();
        let items: Vec<_> = if reverse {
            tree.iter().rev().map(|(k, v)| (k.clone(), *v)).collect()
        } else {
            tree.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.tree.read().keys().cloned().collect())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
