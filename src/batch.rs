//! Write Batch Module
//!
//! Groups puts and deletes so they become visible atomically.
//!
//! ## Commit Layout
//! ```text
//! ┌──────────────────┬──────────────────┬─────┬─────────────────────────┐
//! │ seq|key1  Normal │ seq|key2 Deleted │ ... │ seq|txn-fin BatchFinish │
//! └──────────────────┴──────────────────┴─────┴─────────────────────────┘
//! ```
//! Every key in a data segment is prefixed with the uvarint sequence number
//! of the batch that wrote it (0 for plain writes). Recovery only applies a
//! batch once it finds the matching BatchFinished record.

use std::sync::atomic::Ordering;

use bytes::BufMut;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::WriteBatchOptions;
use crate::data::{decode_uvarint, encode_uvarint, LogRecord, MAX_VARINT_LEN64};
use crate::engine::Engine;
use crate::error::{CaskError, Result};

/// Sequence number of writes made outside a batch
pub(crate) const NON_BATCH_SEQ_NO: u64 = 0;

/// User key of the record that closes a batch
pub(crate) const BATCH_FIN_KEY: &[u8] = b"txn-fin";

/// Prefix `key` with its batch sequence number
pub(crate) fn record_key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN64 + key.len());
    encode_uvarint(&mut buf, seq_no);
    buf.put_slice(key);
    buf
}

/// Split a stored key into the user key and its batch sequence number
pub(crate) fn parse_log_record_key(key: &[u8]) -> Option<(Vec<u8>, u64)> {
    let (seq_no, n) = decode_uvarint(key)?;
    Some((key[n..].to_vec(), seq_no))
}

/// Pending operations committed together
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending: Mutex<Vec<LogRecord>>,
}

impl Engine {
    /// Start a write batch.
    ///
    /// A persistent index that predates the seq-no file cannot tell which
    /// sequence numbers are used, so batches are refused.
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> Result<WriteBatch<'_>> {
        if self.index.is_persistent() && !self.seq_no_file_exists && !self.is_initial {
            return Err(CaskError::BatchUnavailable);
        }
        Ok(WriteBatch {
            engine: self,
            options,
            pending: Mutex::new(Vec::new()),
        })
    }
}

impl WriteBatch<'_> {
    /// Stage a put
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }
        self.pending.lock().push(LogRecord::normal(key, value));
        Ok(())
    }

    /// Stage a delete.
    ///
    /// Deleting a key the engine does not have only drops what this batch
    /// staged for it.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::KeyIsEmpty);
        }

        let mut pending = self.pending.lock();
        if self.engine.index.get(key)?.is_none() {
            pending.retain(|record| record.key != key);
            return Ok(());
        }
        pending.push(LogRecord::tombstone(key));
        Ok(())
    }

    /// Number of staged operations
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Write every staged operation plus the batch marker, then publish
    /// them to the index. Committing an empty batch does nothing.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(CaskError::ExceedMaxBatchNum(self.options.max_batch_num));
        }

        let engine = self.engine;
        let mut segments = engine.segments.write();
        let seq_no = engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut positions = Vec::with_capacity(pending.len());
        for record in pending.iter() {
            let staged = LogRecord {
                key: record_key_with_seq(&record.key, seq_no),
                value: record.value.clone(),
                rec_type: record.rec_type,
            };
            positions.push(engine.append_log_record(&mut segments, &staged)?);
        }

        let finished = LogRecord::batch_finished(record_key_with_seq(BATCH_FIN_KEY, seq_no));
        engine.append_log_record(&mut segments, &finished)?;

        if self.options.sync_writes {
            segments.active.sync()?;
        }

        // Nothing is visible until the marker is on disk
        for (record, pos) in pending.iter().zip(positions) {
            engine.update_index(record.key.clone(), record.rec_type, pos)?;
        }

        debug!(seq_no, ops = pending.len(), "write batch committed");
        pending.clear();
        Ok(())
    }
}
