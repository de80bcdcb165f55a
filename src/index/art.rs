//! Adaptive radix tree index
//!
//! The trie has no ordered cursor of its own, so iterators are built by a
//! full in-order walk into a snapshot vector.

use parking_lot::RwLock;

use crate::data::LogRecordPos;
use crate::error::Result;

use super::{AdaptiveRadixTree, IndexIterator, Indexer, SnapshotIterator};

/// ART-backed index
pub struct ArtIndex {
    tree: RwLock<AdaptiveRadixTree<LogRecordPos>>,
}

impl ArtIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(AdaptiveRadixTree::new()),
        }
    }
}

impl Default for ArtIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for ArtIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().insert(&key, pos))
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
        let mut items = Vec::with_capacity(tree.len());
        tree.for_each(|key, pos| {
            items.push((key.to_vec(), *pos));
            true
        });
        drop(tree);

        Ok(Box::new(SnapshotIterator::from_ascending(items, reverse)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
