//! Engine Module
//!
//! The storage engine that coordinates segments and the index.
//!
//! ## Responsibilities
//! - Append encoded records to the active segment, rotating it by size
//! - Keep the index pointing at the newest record of every key
//! - Rebuild the index on startup (hint file + segment replay)
//! - Persist the batch sequence counter across restarts

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::batch::{parse_log_record_key, record_key_with_seq, NON_BATCH_SEQ_NO};
use crate::config::Config;
use crate::data::{
    parse_data_file_id, DataFile, LogRecord, LogRecordPos, LogRecordType, ReadLogRecord,
    DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME, SEQ_NO_FILE_NAME,
};
use crate::error::{CaskError, Result};
use crate::fio::IoType;
use crate::index::{new_indexer, Indexer, BPTREE_INDEX_DIR_NAME};
use crate::merge;

/// Key of the single record stored in the seq-no file
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// Staging name for the seq-no file while it is rewritten
const SEQ_NO_TEMP_FILE_NAME: &str = "seq-no.tmp";

/// Id of the first data segment (0 is reserved)
const INITIAL_FILE_ID: u32 = 1;

/// The active segment plus every immutable one
pub(crate) struct Segments {
    pub(crate) active: DataFile,
    pub(crate) older: HashMap<u32, DataFile>,
}

impl Segments {
    pub(crate) fn get(&self, file_id: u32) -> Option<&DataFile> {
        if self.active.file_id() == file_id {
            Some(&self.active)
        } else {
            self.older.get(&file_id)
        }
    }
}

/// Storage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Number of live keys
    pub key_num: usize,
    /// Number of data segments
    pub data_file_num: usize,
    /// Bytes held by superseded records that a merge could drop
    pub reclaimable_size: u64,
    /// Bytes used by the data directory
    pub disk_size: u64,
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/batch commit): hold `segments` exclusively
///   across "append + index update", so no reader ever sees a record that
///   is durable but not indexed (or the reverse).
/// - **Reads** (get/iterator values): hold `segments` shared across
///   "index lookup + segment read". Segment reads are positional, so any
///   number of readers proceed in parallel.
/// - **Merge**: serialized by `merge_lock`; takes the write lock only to
///   rotate the active segment, then reads through its own file handles.
pub struct Engine {
    pub(crate) config: Config,

    pub(crate) segments: RwLock<Segments>,

    pub(crate) index: Box<dyn Indexer>,

    /// Last batch sequence number handed out
    pub(crate) seq_no: AtomicU64,

    /// Whether a seq-no file was found at open
    pub(crate) seq_no_file_exists: bool,

    /// Whether the data directory was empty at open
    pub(crate) is_initial: bool,

    /// Held for the duration of a merge
    pub(crate) merge_lock: Mutex<()>,

    /// Bytes appended since the last sync (for `bytes_per_sync`)
    bytes_since_sync: AtomicUsize,

    /// Bytes of superseded records
    pub(crate) reclaim_size: AtomicU64,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory if needed
    /// 2. Finalize a merge that completed before the last shutdown
    /// 3. Open every segment (newest is the active one)
    /// 4. Load the sequence counter
    /// 5. Rebuild the index: hint file, then replay newer segments
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let dir = config.dir_path.clone();

        // Step 1: Create data directory if it doesn't exist
        let is_initial = if !dir.exists() {
            fs::create_dir_all(&dir)?;
            true
        } else {
            fs::read_dir(&dir)?.next().is_none()
        };

        // Step 2: Swap in the output of a finished merge
        let merge_finalized = merge::load_merge_files(&dir)?;

        // Step 3: Index backend and segments
        let index = new_indexer(config.index_type, &dir, config.sync_writes)?;
        let file_ids = load_data_file_ids(&dir)?;
        let segments = open_segments(&dir, &file_ids, config.immutable_io_type)?;

        // Step 4: Sequence counter
        let (seq_no, seq_no_file_exists) = load_seq_no(&dir)?;

        let engine = Self {
            config,
            segments: RwLock::new(segments),
            index,
            seq_no: AtomicU64::new(seq_no),
            seq_no_file_exists,
            is_initial,
            merge_lock: Mutex::new(()),
            bytes_since_sync: AtomicUsize::new(0),
            reclaim_size: AtomicU64::new(0),
        };

        // Step 5: Index
        if engine.index.is_persistent() {
            // Positions survive on disk; only a fresh merge needs repointing
            if merge_finalized {
                engine.load_index_from_hint_file(true)?;
            }
            engine.repair_active_tail()?;
        } else {
            engine.load_index_from_hint_file(false)?;
            engine.load_index_from_data_files(&file_ids)?;
        }

        info!(
            dir = %engine.config.dir_path.display(),
            index = %engine.config.index_type,
            segments = file_ids.len().max(1),
            keys = engine.index.size()?,
            "engine opened"
        );

        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().dir_path(path).build())
    }

    /// Store `value` under `key`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }

        let record = LogRecord::normal(record_key_with_seq(key, NON_BATCH_SEQ_NO), value);

        let mut segments = self.segments.write();
        let pos = self.append_log_record(&mut segments, &record)?;
        self.update_index(key.to_vec(), LogRecordType::Normal, pos)?;

        Ok(())
    }

    /// Get the value stored under `key`
    ///
    /// Returns `KeyNotFound` when the key is absent.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }

        let segments = self.segments.read();
        let pos = self.index.get(key)?.ok_or(CaskError::KeyNotFound)?;
        value_at(&segments, &pos)
    }

    /// Delete `key`; deleting an absent key is a no-op
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }

        let mut segments = self.segments.write();
        if self.index.get(key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord::tombstone(record_key_with_seq(key, NON_BATCH_SEQ_NO));
        let pos = self.append_log_record(&mut segments, &record)?;
        self.update_index(key.to_vec(), LogRecordType::Deleted, pos)?;

        Ok(())
    }

    /// Read the value at `pos` (used by iterators to resolve snapshot entries)
    pub fn get_value_by_position(&self, pos: &LogRecordPos) -> Result<Vec<u8>> {
        let segments = self.segments.read();
        value_at(&segments, pos)
    }

    /// Every live key in ascending order
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.index.list_keys()
    }

    /// Visit every key/value in ascending key order until `f` returns false.
    ///
    /// Walks a snapshot of the index and takes the read lock only while
    /// resolving each value, so `f` may call back into the engine.
    pub fn fold<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut iter = self.index.iterator(false)?;
        iter.rewind();
        while iter.valid() {
            let value = self.get_value_by_position(&iter.value())?;
            if !f(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Flush the active segment to stable storage
    pub fn sync(&self) -> Result<()> {
        self.segments.read().active.sync()
    }

    /// Storage statistics
    pub fn stat(&self) -> Result<Stat> {
        let data_file_num = self.segments.read().older.len() + 1;
        Ok(Stat {
            key_num: self.index.size()?,
            data_file_num,
            reclaimable_size: self.reclaim_size.load(Ordering::SeqCst),
            disk_size: dir_size(&self.config.dir_path)?,
        })
    }

    /// Copy the data directory to `dest`.
    ///
    /// Writers are held off for the duration of the copy.
    pub fn backup(&self, dest: &Path) -> Result<()> {
        let segments = self.segments.read();
        segments.active.sync()?;
        copy_dir(&self.config.dir_path, dest)?;
        info!(dest = %dest.display(), "backup written");
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Persists the sequence counter, closes the index and syncs every
    /// segment.
    pub fn close(&self) -> Result<()> {
        let segments = self.segments.write();

        self.persist_seq_no()?;
        self.index.close()?;

        segments.active.sync()?;
        segments.active.close()?;
        for file in segments.older.values() {
            file.close()?;
        }

        info!(dir = %self.config.dir_path.display(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn dir_path(&self) -> &Path {
        &self.config.dir_path
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Id of the segment currently receiving appends
    pub fn active_file_id(&self) -> u32 {
        self.segments.read().active.file_id()
    }

    /// Last batch sequence number handed out
    pub fn seq_no(&self) -> u64 {
        self.seq_no.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Write Path (called with the segments write lock held)
    // =========================================================================

    /// Append `record` to the active segment, rotating first if it would
    /// overflow the target segment size
    pub(crate) fn append_log_record(
        &self,
        segments: &mut Segments,
        record: &LogRecord,
    ) -> Result<LogRecordPos> {
        let (encoded, _) = record.encode();
        let record_len = encoded.len() as u64;

        // A record larger than a whole segment still goes into an empty one
        let write_offset = segments.active.write_offset();
        if write_offset > 0 && write_offset + record_len > self.config.data_file_size {
            self.rotate_active_file(segments)?;
        }

        let offset = segments.active.write_offset();
        segments.active.write(&encoded)?;

        let unsynced = self.bytes_since_sync.fetch_add(encoded.len(), Ordering::SeqCst)
            + encoded.len();
        let need_sync = self.config.sync_writes
            || (self.config.bytes_per_sync > 0 && unsynced >= self.config.bytes_per_sync);
        if need_sync {
            segments.active.sync()?;
            self.bytes_since_sync.store(0, Ordering::SeqCst);
        }

        Ok(LogRecordPos::new(
            segments.active.file_id(),
            offset,
            encoded.len() as u32,
        ))
    }

    /// Seal the active segment and start the next one
    pub(crate) fn rotate_active_file(&self, segments: &mut Segments) -> Result<()> {
        let dir = &self.config.dir_path;
        segments.active.sync()?;

        let next_id = segments.active.file_id() + 1;
        let next = DataFile::new(dir, next_id, IoType::StandardFio)?;
        let mut sealed = std::mem::replace(&mut segments.active, next);

        if self.config.immutable_io_type != IoType::StandardFio {
            sealed.set_io_manager(dir, self.config.immutable_io_type)?;
        }

        debug!(
            sealed = sealed.file_id(),
            active = next_id,
            io = %self.config.immutable_io_type,
            "rotated active segment"
        );
        segments.older.insert(sealed.file_id(), sealed);
        Ok(())
    }

    /// Apply one record to the index and account for reclaimable bytes
    pub(crate) fn update_index(
        &self,
        key: Vec<u8>,
        rec_type: LogRecordType,
        pos: LogRecordPos,
    ) -> Result<()> {
        let reclaimed = match rec_type {
            LogRecordType::Normal => self.index.put(key, pos)?.map_or(0, |old| old.size as u64),
            LogRecordType::Deleted => {
                // The tombstone itself is garbage as soon as it is written
                let old = self.index.delete(&key)?;
                pos.size as u64 + old.map_or(0, |old| old.size as u64)
            }
            LogRecordType::BatchFinished => 0,
        };
        if reclaimed > 0 {
            self.reclaim_size.fetch_add(reclaimed, Ordering::SeqCst);
        }
        Ok(())
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Load positions from the hint file written by the last merge.
    ///
    /// With `repoint_only`, a hint entry is applied only when the index still
    /// points into the merged range (persistent index after a merge swap).
    fn load_index_from_hint_file(&self, repoint_only: bool) -> Result<()> {
        let dir = &self.config.dir_path;
        if !dir.join(HINT_FILE_NAME).exists() {
            return Ok(());
        }
        let boundary = merge::merged_boundary(dir)?;

        let hint_file = DataFile::open_hint_file(dir)?;
        let mut offset = 0u64;
        let mut loaded = 0usize;
        loop {
            let ReadLogRecord { record, size } = match hint_file.read_log_record(offset) {
                Ok(read) => read,
                Err(CaskError::EndOfSegment) => break,
                Err(CaskError::CorruptRecord(msg)) => {
                    warn!(offset, %msg, "corrupt hint record, ignoring rest of hint file");
                    break;
                }
                Err(e) => return Err(e),
            };
            let pos = LogRecordPos::decode(&record.value)?;

            let apply = if repoint_only {
                match (self.index.get(&record.key)?, boundary) {
                    (Some(current), Some(boundary)) => current.file_id <= boundary,
                    _ => false,
                }
            } else {
                true
            };
            if apply {
                self.index.put(record.key, pos)?;
                loaded += 1;
            }
            offset += size as u64;
        }

        debug!(loaded, "index entries loaded from hint file");
        Ok(())
    }

    /// Replay every segment not covered by the hint file, oldest first.
    ///
    /// Batch records are held back until their BatchFinished marker shows
    /// up; batches without a marker are dropped.
    fn load_index_from_data_files(&self, file_ids: &[u32]) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }
        let boundary = merge::merged_boundary(&self.config.dir_path)?;

        let mut segments = self.segments.write();
        let active_id = segments.active.file_id();
        let mut pending: HashMap<u64, Vec<(Vec<u8>, LogRecordType, LogRecordPos)>> =
            HashMap::new();
        let mut max_seq_no = self.seq_no.load(Ordering::SeqCst);
        let mut replayed = 0usize;

        for &file_id in file_ids {
            if boundary.is_some_and(|boundary| file_id <= boundary) {
                continue;
            }
            let data_file = segments
                .get(file_id)
                .ok_or(CaskError::DataFileNotFound(file_id))?;

            let mut offset = 0u64;
            loop {
                let ReadLogRecord { record, size } = match data_file.read_log_record(offset) {
                    Ok(read) => read,
                    Err(CaskError::EndOfSegment) => break,
                    Err(CaskError::CorruptRecord(msg)) => {
                        warn!(file_id, offset, %msg, "corrupt record, ignoring rest of segment");
                        break;
                    }
                    Err(e) => return Err(e),
                };
                let Some((key, seq_no)) = parse_log_record_key(&record.key) else {
                    warn!(file_id, offset, "malformed record key, ignoring rest of segment");
                    break;
                };
                let pos = LogRecordPos::new(file_id, offset, size as u32);

                if seq_no == NON_BATCH_SEQ_NO {
                    self.update_index(key, record.rec_type, pos)?;
                } else if record.rec_type == LogRecordType::BatchFinished {
                    for (key, rec_type, pos) in pending.remove(&seq_no).unwrap_or_default() {
                        self.update_index(key, rec_type, pos)?;
                    }
                } else {
                    pending
                        .entry(seq_no)
                        .or_default()
                        .push((key, record.rec_type, pos));
                }

                max_seq_no = max_seq_no.max(seq_no);
                offset += size as u64;
                replayed += 1;
            }

            if file_id == active_id {
                truncate_active_tail(&mut segments, offset)?;
            }
        }

        if !pending.is_empty() {
            debug!(batches = pending.len(), "discarded uncommitted write batches");
        }
        self.seq_no.store(max_seq_no, Ordering::SeqCst);
        debug!(replayed, seq_no = max_seq_no, "segments replayed");
        Ok(())
    }

    /// Cut a torn write off the active segment when the index was not
    /// rebuilt by replay.
    ///
    /// The tail is kept when the index still points at or past the first
    /// unreadable record; merge refuses such a segment instead.
    fn repair_active_tail(&self) -> Result<()> {
        let mut segments = self.segments.write();
        let file_id = segments.active.file_id();
        let valid = scan_valid_len(&segments.active)?;

        if valid < segments.active.file_size()? && self.index_points_past(file_id, valid)? {
            warn!(
                file_id,
                valid,
                "unreadable record in active segment is followed by indexed records"
            );
            return Ok(());
        }
        truncate_active_tail(&mut segments, valid)
    }

    /// Whether any index entry points into `file_id` at or after `offset`
    pub(crate) fn index_points_past(&self, file_id: u32, offset: u64) -> Result<bool> {
        let mut iter = self.index.iterator(false)?;
        iter.rewind();
        while iter.valid() {
            let pos = iter.value();
            if pos.file_id == file_id && pos.offset >= offset {
                return Ok(true);
            }
            iter.next();
        }
        Ok(false)
    }

    /// Rewrite the seq-no file with the current counter
    ///
    /// Written to a temp file and renamed over the old one, so a crash
    /// leaves either the old or the new counter on disk.
    fn persist_seq_no(&self) -> Result<()> {
        let dir = &self.config.dir_path;
        let tmp_path = dir.join(SEQ_NO_TEMP_FILE_NAME);

        let seq_no = self.seq_no.load(Ordering::SeqCst);
        let record = LogRecord::normal(SEQ_NO_KEY, bincode::serialize(&seq_no)?);
        let mut file = File::create(&tmp_path)?;
        file.write_all(&record.encode().0)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, dir.join(SEQ_NO_FILE_NAME))?;
        sync_dir(dir)
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

/// Decode the value at `pos`; a tombstone reads as `KeyNotFound`
fn value_at(segments: &Segments, pos: &LogRecordPos) -> Result<Vec<u8>> {
    let data_file = segments
        .get(pos.file_id)
        .ok_or(CaskError::DataFileNotFound(pos.file_id))?;

    let read = data_file.read_log_record(pos.offset)?;
    if read.record.rec_type == LogRecordType::Deleted {
        return Err(CaskError::KeyNotFound);
    }
    Ok(read.record.value)
}

/// Length of the readable prefix of `data_file`
fn scan_valid_len(data_file: &DataFile) -> Result<u64> {
    let mut offset = 0u64;
    loop {
        match data_file.read_log_record(offset) {
            Ok(read) => offset += read.size as u64,
            Err(CaskError::EndOfSegment) => return Ok(offset),
            Err(CaskError::CorruptRecord(msg)) => {
                warn!(
                    file_id = data_file.file_id(),
                    offset,
                    %msg,
                    "corrupt record in active segment"
                );
                return Ok(offset);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Drop anything past `valid` in the active segment so the next append
/// lands right after the last good record
fn truncate_active_tail(segments: &mut Segments, valid: u64) -> Result<()> {
    let file_size = segments.active.file_size()?;
    if file_size > valid {
        warn!(
            file_id = segments.active.file_id(),
            valid,
            file_size,
            "truncating unreadable tail of active segment"
        );
        segments.active.truncate(valid)?;
    }
    segments.active.set_write_offset(valid);
    Ok(())
}

/// Ids of every `*.data` file in `dir`, ascending
pub(crate) fn load_data_file_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut file_ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.ends_with(DATA_FILE_NAME_SUFFIX) {
            continue;
        }
        let file_id = parse_data_file_id(&name)
            .ok_or_else(|| CaskError::DirectoryCorrupted(format!("bad segment name {}", name)))?;
        file_ids.push(file_id);
    }
    file_ids.sort_unstable();
    Ok(file_ids)
}

fn open_segments(dir: &Path, file_ids: &[u32], immutable_io_type: IoType) -> Result<Segments> {
    let Some((&active_id, sealed_ids)) = file_ids.split_last() else {
        return Ok(Segments {
            active: DataFile::new(dir, INITIAL_FILE_ID, IoType::StandardFio)?,
            older: HashMap::new(),
        });
    };

    let mut older = HashMap::with_capacity(sealed_ids.len());
    for &file_id in sealed_ids {
        older.insert(file_id, DataFile::new(dir, file_id, immutable_io_type)?);
    }

    Ok(Segments {
        active: DataFile::new(dir, active_id, IoType::StandardFio)?,
        older,
    })
}

/// Last persisted batch sequence number, and whether the file existed
fn load_seq_no(dir: &Path) -> Result<(u64, bool)> {
    if !dir.join(SEQ_NO_FILE_NAME).exists() {
        return Ok((0, false));
    }

    let file = DataFile::open_seq_no_file(dir)?;
    match file.read_log_record(0) {
        Ok(read) => Ok((bincode::deserialize(&read.record.value)?, true)),
        Err(CaskError::EndOfSegment) => Ok((0, false)),
        Err(e) => Err(e),
    }
}

/// Make a rename in `dir` durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Total size of regular files under `dir`
pub(crate) fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Recursive copy; LMDB's lock file is recreated on open and is skipped
fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let target = dest.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if !(name == "lock.mdb" && src.ends_with(BPTREE_INDEX_DIR_NAME)) {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
