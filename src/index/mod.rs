//! Index Module
//!
//! Maps every live key to the position of its newest record.
//!
//! ## Backends
//! - [`BTreeIndex`]: `BTreeMap` behind an `RwLock`
//! - [`ArtIndex`]: adaptive radix tree behind an `RwLock`
//! - [`BPlusTreeIndex`]: LMDB B+Tree on disk, survives restarts
//!
//! Every backend hands out the same [`SnapshotIterator`]: an ordered copy of
//! the index taken under the read lock, so iteration never blocks writers
//! and never observes later mutations.

mod art;
mod bptree;
mod btree;
mod iterator;
mod radix_tree;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::data::LogRecordPos;
use crate::error::{CaskError, Result};

pub use art::ArtIndex;
pub use bptree::{BPlusTreeIndex, BPTREE_INDEX_DIR_NAME};
pub use btree::BTreeIndex;
pub use iterator::SnapshotIterator;
pub use radix_tree::AdaptiveRadixTree;

/// Key → position index
pub trait Indexer: Send + Sync {
    /// Insert or overwrite; returns the position it replaced
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>>;

    /// Look up the position for `key`
    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>>;

    /// Remove `key`; returns the removed position (`None` = key was absent)
    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>>;

    /// Number of keys
    fn size(&self) -> Result<usize>;

    /// Snapshot iterator, ascending or (with `reverse`) descending
    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>>;

    /// Every key in ascending order
    fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut iter = self.iterator(false)?;
        let mut keys = Vec::new();
        iter.rewind();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        Ok(keys)
    }

    /// Whether positions survive a restart without replaying segments
    fn is_persistent(&self) -> bool {
        false
    }

    /// Flush and release backend resources
    fn close(&self) -> Result<()>;
}

/// Cursor over an index snapshot.
///
/// `key()` and `value()` may only be called while `valid()` is true.
pub trait IndexIterator: Send {
    /// Back to the first entry
    fn rewind(&mut self);

    /// First entry `>= key` (forward) or `<= key` (reverse)
    fn seek(&mut self, key: &[u8]);

    /// Advance by one entry
    fn next(&mut self);

    fn valid(&self) -> bool;

    fn key(&self) -> &[u8];

    fn value(&self) -> LogRecordPos;

    /// Drop the snapshot
    fn close(&mut self);
}

/// Index backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Ordered map
    BTree,

    /// Adaptive radix tree
    Art,

    /// Disk-backed B+Tree
    BPlusTree,
}

impl TryFrom<u8> for IndexType {
    type Error = CaskError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            1 => Ok(IndexType::BTree),
            2 => Ok(IndexType::Art),
            3 => Ok(IndexType::BPlusTree),
            other => Err(CaskError::UnsupportedBackend(format!("index type tag {}", other))),
        }
    }
}

impl FromStr for IndexType {
    type Err = CaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "btree" => Ok(IndexType::BTree),
            "art" => Ok(IndexType::Art),
            "bptree" | "bplustree" => Ok(IndexType::BPlusTree),
            other => Err(CaskError::UnsupportedBackend(format!("index type '{}'", other))),
        }
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexType::BTree => write!(f, "btree"),
            IndexType::Art => write!(f, "art"),
            IndexType::BPlusTree => write!(f, "bptree"),
        }
    }
}

/// Build the backend named by `index_type`.
///
/// `dir_path` and `sync_writes` only matter for the on-disk B+Tree.
pub fn new_indexer(
    index_type: IndexType,
    dir_path: &Path,
    sync_writes: bool,
) -> Result<Box<dyn Indexer>> {
    match index_type {
        IndexType::BTree => Ok(Box::new(BTreeIndex::new())),
        IndexType::Art => Ok(Box::new(ArtIndex::new())),
        IndexType::BPlusTree => Ok(Box::new(BPlusTreeIndex::open(dir_path, sync_writes)?)),
    }
}
