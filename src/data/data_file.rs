//! Segment (data file)
//!
//! An append-only file of encoded log records. The engine owns exactly one
//! writable segment at a time; the rest are read-only.

use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};
use crate::fio::{new_io_manager, IoManager, IoType};

use super::log_record::{
    decode_log_record_header, verify_crc, LogRecord, LogRecordPos, LogRecordType, ReadLogRecord,
    CRC_SIZE, MAX_LOG_RECORD_HEADER_SIZE,
};

pub const DATA_FILE_NAME_SUFFIX: &str = ".data";
pub const HINT_FILE_NAME: &str = "hint-index";
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// File id shared by the auxiliary files; data segments start at 1
pub const RESERVED_FILE_ID: u32 = 0;

/// A single segment on disk
pub struct DataFile {
    file_id: u32,
    /// Where the next append lands
    write_offset: u64,
    io_manager: Box<dyn IoManager>,
}

impl DataFile {
    /// Open (or create) the data segment `file_id` in `dir`
    pub fn new(dir: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        Self::open_path(&data_file_path(dir, file_id), file_id, io_type)
    }

    /// Open the hint file written by merge
    pub fn open_hint_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(HINT_FILE_NAME), RESERVED_FILE_ID, IoType::StandardFio)
    }

    /// Open the marker that flags a completed merge
    pub fn open_merge_finished_file(dir: &Path) -> Result<Self> {
        Self::open_path(
            &dir.join(MERGE_FINISHED_FILE_NAME),
            RESERVED_FILE_ID,
            IoType::StandardFio,
        )
    }

    /// Open the file holding the last used batch sequence number
    pub fn open_seq_no_file(dir: &Path) -> Result<Self> {
        Self::open_path(&dir.join(SEQ_NO_FILE_NAME), RESERVED_FILE_ID, IoType::StandardFio)
    }

    fn open_path(path: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        let io_manager = new_io_manager(path, io_type)?;
        let write_offset = io_manager.size()?;
        Ok(Self {
            file_id,
            write_offset,
            io_manager,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    pub fn file_size(&self) -> Result<u64> {
        self.io_manager.size()
    }

    /// Read the record starting at `offset`.
    ///
    /// `Err(EndOfSegment)` means there is no complete record at `offset`:
    /// either the end of the file, a zeroed tail, or a record whose bytes
    /// were only partially written.
    pub fn read_log_record(&self, offset: u64) -> Result<ReadLogRecord> {
        let file_size = self.io_manager.size()?;
        if offset >= file_size {
            return Err(CaskError::EndOfSegment);
        }

        // Clamp the header read to what is left in the file
        let header_bytes = (MAX_LOG_RECORD_HEADER_SIZE as u64).min(file_size - offset) as usize;
        let header_buf = self.read_n_bytes(header_bytes, offset)?;

        let (header, header_size) = match decode_log_record_header(&header_buf)? {
            Some(parsed) => parsed,
            None => return Err(CaskError::EndOfSegment),
        };

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let record_size = header_size + key_size + value_size;
        if offset + record_size as u64 > file_size {
            return Err(CaskError::EndOfSegment);
        }

        let kv_buf = if key_size + value_size > 0 {
            self.read_n_bytes(key_size + value_size, offset + header_size as u64)?
        } else {
            Vec::new()
        };
        let (key, value) = kv_buf.split_at(key_size);

        verify_crc(&header, &header_buf[CRC_SIZE..header_size], key, value).map_err(|e| match e {
            CaskError::CorruptRecord(msg) => CaskError::CorruptRecord(format!(
                "file {} offset {}: {}",
                self.file_id, offset, msg
            )),
            other => other,
        })?;

        let rec_type = LogRecordType::from_u8(header.rec_type).ok_or_else(|| {
            CaskError::CorruptRecord(format!(
                "file {} offset {}: unknown record type {}",
                self.file_id, offset, header.rec_type
            ))
        })?;

        Ok(ReadLogRecord {
            record: LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                rec_type,
            },
            size: record_size,
        })
    }

    /// Append raw bytes, advancing the write offset by what actually landed
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let written = self.io_manager.write(buf)?;
        self.write_offset += written as u64;
        if written != buf.len() {
            return Err(CaskError::ShortWrite {
                expected: buf.len(),
                written,
            });
        }
        Ok(written)
    }

    /// Append a hint record: the key and its encoded position
    pub fn write_hint_record(&mut self, key: &[u8], pos: &LogRecordPos) -> Result<()> {
        let record = LogRecord::normal(key, pos.encode());
        let (encoded, _) = record.encode();
        self.write(&encoded)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.io_manager.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.io_manager.close()
    }

    /// Drop everything past `len` (used to cut a torn tail during recovery)
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.io_manager.truncate(len)?;
        self.write_offset = len;
        Ok(())
    }

    /// Close the current backend and reopen the same segment with `io_type`
    pub fn set_io_manager(&mut self, dir: &Path, io_type: IoType) -> Result<()> {
        self.io_manager.close()?;
        self.io_manager = new_io_manager(&data_file_path(dir, self.file_id), io_type)?;
        Ok(())
    }

    fn read_n_bytes(&self, n: usize, offset: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let read = self.io_manager.read(&mut buf, offset)?;
        if read < n {
            return Err(CaskError::EndOfSegment);
        }
        Ok(buf)
    }
}

/// `{dir}/{file_id:09}.data`
pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{:09}{}", file_id, DATA_FILE_NAME_SUFFIX))
}

/// Parse the id out of a segment file name: "000000042.data" → Some(42)
pub fn parse_data_file_id(file_name: &str) -> Option<u32> {
    file_name.strip_suffix(DATA_FILE_NAME_SUFFIX)?.parse().ok()
}
