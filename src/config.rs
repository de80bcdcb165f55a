//! Configuration for caskdb
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{CaskError, Result};
use crate::fio::IoType;
use crate::index::IndexType;

/// Main configuration for a caskdb instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {dir_path}/
    ///     ├── 000000001.data   (segments, one active)
    ///     ├── hint-index       (written by merge)
    ///     ├── merge-finished   (written by merge)
    ///     ├── seq-no           (written on close)
    ///     └── bptree-index/    (only with IndexType::BPlusTree)
    pub dir_path: PathBuf,

    /// Target size of a single segment; the active segment rotates before
    /// an append would push it past this many bytes
    pub data_file_size: u64,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// fsync after every write
    pub sync_writes: bool,

    /// fsync once this many bytes were written since the last sync (0 = never)
    pub bytes_per_sync: usize,

    // -------------------------------------------------------------------------
    // Index / IO Configuration
    // -------------------------------------------------------------------------
    /// In-memory (or on-disk) index backend
    pub index_type: IndexType,

    /// IO backend for immutable segments. The active segment always uses
    /// standard file IO.
    pub immutable_io_type: IoType,

    // -------------------------------------------------------------------------
    // Merge Configuration
    // -------------------------------------------------------------------------
    /// Minimum reclaimable/total byte ratio before a merge is allowed
    pub data_file_merge_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir_path: std::env::temp_dir().join("caskdb"),
            data_file_size: 256 * 1024 * 1024, // 256 MB
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            immutable_io_type: IoType::MemoryMap,
            data_file_merge_ratio: 0.5,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(CaskError::Config("database dir path is empty".to_string()));
        }
        if self.data_file_size == 0 {
            return Err(CaskError::Config(
                "data file size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.data_file_merge_ratio) {
            return Err(CaskError::Config(format!(
                "invalid merge ratio {}, must be between 0 and 1",
                self.data_file_merge_ratio
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn dir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dir_path = path.into();
        self
    }

    /// Set the segment size threshold (in bytes)
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.config.data_file_size = size;
        self
    }

    /// Sync after every write
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.config.sync_writes = sync;
        self
    }

    /// Sync after this many written bytes
    pub fn bytes_per_sync(mut self, bytes: usize) -> Self {
        self.config.bytes_per_sync = bytes;
        self
    }

    /// Set the index backend
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.config.index_type = index_type;
        self
    }

    /// Set the IO backend used for immutable segments
    pub fn immutable_io_type(mut self, io_type: IoType) -> Self {
        self.config.immutable_io_type = io_type;
        self
    }

    /// Set the merge threshold ratio
    pub fn data_file_merge_ratio(mut self, ratio: f32) -> Self {
        self.config.data_file_merge_ratio = ratio;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Options for a user-facing iterator
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only visit keys starting with this prefix (empty = all keys)
    pub prefix: Vec<u8>,

    /// Visit keys in descending order
    pub reverse: bool,
}

impl IteratorOptions {
    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }
}

/// Options for a write batch
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// Maximum number of pending operations per commit
    pub max_batch_num: usize,

    /// Sync the active segment when the batch commits
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}
