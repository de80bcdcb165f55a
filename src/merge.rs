//! Merge Module
//!
//! Compaction: rewrites the live records of sealed segments into fresh
//! segments and drops everything superseded.
//!
//! ## Merge Flow
//! ```text
//!   data dir                          {dir}-merge
//! ┌─────────────────┐   live only   ┌──────────────────────┐
//! │ 1.data  2.data  │ ────────────► │ 1.data  hint-index   │
//! │ 3.data (sealed) │               │ merge-finished (last)│
//! ├─────────────────┤               └──────────┬───────────┘
//! │ 4.data (active) │                          │ next open
//! └─────────────────┘ ◄────────────────────────┘ swap in
//! ```
//!
//! The running engine never switches files underneath its readers; the swap
//! happens in `load_merge_files` before the next open builds its index.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::batch::{parse_log_record_key, record_key_with_seq, NON_BATCH_SEQ_NO};
use crate::data::{
    data_file_path, DataFile, LogRecord, LogRecordPos, ReadLogRecord, HINT_FILE_NAME,
    MERGE_FINISHED_FILE_NAME,
};
use crate::engine::{dir_size, load_data_file_ids, Engine};
use crate::error::{CaskError, Result};
use crate::fio::IoType;

/// Key of the record stored in the merge-finished file
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Value of the merge-finished record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct MergeMarker {
    /// Highest segment id covered by the merge
    boundary: u32,
    /// Highest segment id the merge wrote (≤ boundary)
    last_output_id: u32,
}

impl Engine {
    /// Compact every sealed segment.
    ///
    /// The output is only staged; it replaces the old segments the next time
    /// the engine is opened.
    pub fn merge(&self) -> Result<()> {
        let _merging = self.merge_lock.try_lock().ok_or(CaskError::MergeInProgress)?;
        let dir = &self.config.dir_path;

        let total_size = dir_size(dir)?;
        let reclaimable = self.reclaim_size.load(Ordering::SeqCst);
        let ratio = if total_size == 0 {
            0.0
        } else {
            reclaimable as f32 / total_size as f32
        };
        if ratio < self.config.data_file_merge_ratio {
            return Err(CaskError::MergeRatioUnreached {
                ratio,
                threshold: self.config.data_file_merge_ratio,
            });
        }

        // Seal the active segment so everything written so far is covered
        let mut merge_ids: Vec<u32> = {
            let mut segments = self.segments.write();
            if segments.active.write_offset() > 0 {
                self.rotate_active_file(&mut segments)?;
            }
            let active_id = segments.active.file_id();
            segments
                .older
                .keys()
                .copied()
                .filter(|&id| id < active_id)
                .collect()
        };
        merge_ids.sort_unstable();
        let Some(&boundary) = merge_ids.last() else {
            debug!("nothing to merge");
            return Ok(());
        };

        let merge_dir = merge_dir_path(dir);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        let mut output = MergeOutput::new(&merge_dir, self.config.data_file_size)?;
        let mut hint_file = DataFile::open_hint_file(&merge_dir)?;
        let mut kept = 0usize;

        for &file_id in &merge_ids {
            // Private handle; the engine's own handles stay untouched
            let data_file = DataFile::new(dir, file_id, IoType::StandardFio)?;
            let mut offset = 0u64;
            loop {
                let ReadLogRecord { record, size } = match data_file.read_log_record(offset) {
                    Ok(read) => read,
                    Err(CaskError::EndOfSegment) | Err(CaskError::CorruptRecord(_))
                        if offset >= data_file.file_size()? =>
                    {
                        break;
                    }
                    Err(CaskError::EndOfSegment) | Err(CaskError::CorruptRecord(_)) => {
                        // Skipping is only safe when nothing indexed lies past here
                        if self.index_points_past(file_id, offset)? {
                            fs::remove_dir_all(&merge_dir)?;
                            return Err(CaskError::CorruptRecord(format!(
                                "segment {} unreadable at offset {} with live records after it",
                                file_id, offset
                            )));
                        }
                        warn!(file_id, offset, "unreadable record, merge skips rest of segment");
                        break;
                    }
                    Err(e) => return Err(e),
                };

                if let Some((key, _)) = parse_log_record_key(&record.key) {
                    // Live iff the index still points at exactly this record
                    let live = self
                        .index
                        .get(&key)?
                        .is_some_and(|pos| pos.file_id == file_id && pos.offset == offset);
                    if live {
                        let rewritten = LogRecord {
                            key: record_key_with_seq(&key, NON_BATCH_SEQ_NO),
                            value: record.value,
                            rec_type: record.rec_type,
                        };
                        let pos = output.append(&rewritten)?;
                        hint_file.write_hint_record(&key, &pos)?;
                        kept += 1;
                    }
                }
                offset += size as u64;
            }
        }

        output.sync()?;
        hint_file.sync()?;

        let last_output_id = output.file_id();
        if last_output_id > boundary {
            return Err(CaskError::DirectoryCorrupted(format!(
                "merge output id {} exceeds merged range {}",
                last_output_id, boundary
            )));
        }

        // The marker makes the merge count; everything above must be durable
        let marker = MergeMarker {
            boundary,
            last_output_id,
        };
        let mut marker_file = DataFile::open_merge_finished_file(&merge_dir)?;
        let record = LogRecord::normal(MERGE_FINISHED_KEY, bincode::serialize(&marker)?);
        marker_file.write(&record.encode().0)?;
        marker_file.sync()?;

        info!(
            segments = merge_ids.len(),
            boundary,
            kept,
            "merge staged, applied on next open"
        );
        Ok(())
    }
}

/// Sequential writer for merge output segments
struct MergeOutput {
    dir: PathBuf,
    data_file_size: u64,
    active: DataFile,
}

impl MergeOutput {
    fn new(dir: &Path, data_file_size: u64) -> Result<Self> {
        Ok(Self {
            dir: dir.to_path_buf(),
            data_file_size,
            active: DataFile::new(dir, 1, IoType::StandardFio)?,
        })
    }

    /// Same rotation rule as the engine's write path
    fn append(&mut self, record: &LogRecord) -> Result<LogRecordPos> {
        let (encoded, _) = record.encode();
        let write_offset = self.active.write_offset();
        if write_offset > 0 && write_offset + encoded.len() as u64 > self.data_file_size {
            self.active.sync()?;
            let next_id = self.active.file_id() + 1;
            self.active = DataFile::new(&self.dir, next_id, IoType::StandardFio)?;
        }

        let offset = self.active.write_offset();
        self.active.write(&encoded)?;
        Ok(LogRecordPos::new(
            self.active.file_id(),
            offset,
            encoded.len() as u32,
        ))
    }

    fn file_id(&self) -> u32 {
        self.active.file_id()
    }

    fn sync(&self) -> Result<()> {
        self.active.sync()
    }
}

/// `{parent}/{dir_name}-merge`
pub fn merge_dir_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.parent()
        .unwrap_or(dir)
        .join(format!("{}-merge", name))
}

/// Highest segment id covered by the merge whose marker sits in `dir`
pub(crate) fn merged_boundary(dir: &Path) -> Result<Option<u32>> {
    Ok(read_merge_marker(dir)?.map(|marker| marker.boundary))
}

fn read_merge_marker(dir: &Path) -> Result<Option<MergeMarker>> {
    if !dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        return Ok(None);
    }

    let marker_file = DataFile::open_merge_finished_file(dir)?;
    match marker_file.read_log_record(0) {
        Ok(read) => Ok(Some(bincode::deserialize(&read.record.value)?)),
        Err(CaskError::EndOfSegment) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Swap in the output of a finished merge.
///
/// Returns true when a merge was applied. Every step can be repeated, so an
/// interrupted swap is completed by the next call.
pub(crate) fn load_merge_files(dir: &Path) -> Result<bool> {
    let merge_dir = merge_dir_path(dir);
    if !merge_dir.exists() {
        return Ok(false);
    }

    let Some(marker) = read_merge_marker(&merge_dir)? else {
        warn!(merge_dir = %merge_dir.display(), "discarding unfinished merge");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(false);
    };

    // Outputs overwrite the same-id segments they replace
    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == MERGE_FINISHED_FILE_NAME {
            continue;
        }
        fs::rename(entry.path(), dir.join(&name))?;
    }

    for file_id in load_data_file_ids(dir)? {
        if file_id > marker.last_output_id && file_id <= marker.boundary {
            fs::remove_file(data_file_path(dir, file_id))?;
        }
    }

    fs::rename(
        merge_dir.join(MERGE_FINISHED_FILE_NAME),
        dir.join(MERGE_FINISHED_FILE_NAME),
    )?;
    fs::remove_dir_all(&merge_dir)?;

    info!(
        boundary = marker.boundary,
        hint = %dir.join(HINT_FILE_NAME).display(),
        "merge applied"
    );
    Ok(true)
}
