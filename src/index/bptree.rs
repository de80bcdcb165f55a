//! Disk-backed B+Tree index
//!
//! Positions live in an LMDB environment under `{dir}/bptree-index`, so the
//! index outlives the process and large key sets do not have to fit in RAM.
//! LMDB already gives single-writer / many-reader transactions, which is the
//! same exclusion discipline the in-memory backends get from their RwLock.

use std::fs;
use std::path::Path;

use heed::types::{Bytes, SerdeBincode};
use heed::{Database, Env, EnvFlags, EnvOpenOptions};

use crate::data::LogRecordPos;
use crate::error::Result;

use super::{IndexIterator, Indexer, SnapshotIterator};

pub const BPTREE_INDEX_DIR_NAME: &str = "bptree-index";

const BPTREE_DB_NAME: &str = "positions";

/// Upper bound on the memory map backing the environment
const BPTREE_MAP_SIZE: usize = 1024 * 1024 * 1024; // 1 GB

/// LMDB-backed index
pub struct BPlusTreeIndex {
    env: Env,
    db: Database<Bytes, SerdeBincode<LogRecordPos>>,
}

impl BPlusTreeIndex {
    /// Open or create the index environment inside `dir_path`
    pub fn open(dir_path: &Path, sync_writes: bool) -> Result<Self> {
        let env_path = dir_path.join(BPTREE_INDEX_DIR_NAME);
        fs::create_dir_all(&env_path)?;

        let mut options = EnvOpenOptions::new();
        options.map_size(BPTREE_MAP_SIZE).max_dbs(1);
        if !sync_writes {
            // SAFETY: skipping the commit fsync only weakens durability; the
            // engine syncs the environment explicitly on close.
            unsafe {
                options.flags(EnvFlags::NO_SYNC);
            }
        }

        // SAFETY: the environment directory is private to this engine instance
        // and is opened once per process.
        let env = unsafe { options.open(&env_path)? };

        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, Some(BPTREE_DB_NAME))?;
        wtxn.commit()?;

        Ok(Self { env, db })
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let mut wtxn = self.env.write_txn()?;
        let previous = self.db.get(&wtxn, &key)?;
        self.db.put(&mut wtxn, &key, &pos)?;
        wtxn.commit()?;
        Ok(previous)
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.get(&rtxn, key)?)
    }

    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        let mut wtxn = self.env.write_txn()?;
        let previous = self.db.get(&wtxn, key)?;
        if previous.is_some() {
            self.db.delete(&mut wtxn, key)?;
        }
        wtxn.commit()?;
        Ok(previous)
    }

    fn size(&self) -> Result<usize> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)? as usize)
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let rtxn = self.env.read_txn()?;
        let mut items = Vec::new();
        if reverse {
            for entry in self.db.rev_iter(&rtxn)? {
                let (key, pos) = entry?;
                items.push((key.to_vec(), pos));
            }
        } else {
            for entry in self.db.iter(&rtxn)? {
                let (key, pos) = entry?;
                items.push((key.to_vec(), pos));
            }
        }
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn is_persistent(&self) -> bool {
        true
    }

    fn close(&self) -> Result<()> {
        self.env.force_sync()?;
        Ok(())
    }
}
