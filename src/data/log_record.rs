//! Log record codec
//!
//! ## Record Layout
//! ```text
//! ┌─────────┬──────────┬──────────────────┬────────────────────┬─────┬───────┐
//! │ CRC (4) │ Type (1) │ KeySize (varint) │ ValueSize (varint) │ Key │ Value │
//! └─────────┴──────────┴──────────────────┴────────────────────┴─────┴───────┘
//! ```
//! The CRC covers everything after itself. Sizes are ZigZag varints, so the
//! header is between 7 and 15 bytes.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{CaskError, Result};

use super::varint::{decode_uvarint, decode_varint, encode_uvarint, encode_varint, MAX_VARINT_LEN32};

/// Size of the CRC field at the front of every record
pub const CRC_SIZE: usize = 4;

/// crc + type + two 32-bit varints
pub const MAX_LOG_RECORD_HEADER_SIZE: usize = CRC_SIZE + 1 + MAX_VARINT_LEN32 * 2;

/// Kind of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A live key/value pair
    Normal = 0,

    /// A tombstone
    Deleted = 1,

    /// Terminates a write batch
    BatchFinished = 2,
}

impl LogRecordType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(LogRecordType::Normal),
            1 => Some(LogRecordType::Deleted),
            2 => Some(LogRecordType::BatchFinished),
            _ => None,
        }
    }
}

/// A record on its way to (or back from) a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: LogRecordType,
}

impl LogRecord {
    pub fn normal(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            rec_type: LogRecordType::Normal,
        }
    }

    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            rec_type: LogRecordType::Deleted,
        }
    }

    pub fn batch_finished(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            rec_type: LogRecordType::BatchFinished,
        }
    }

    /// Encode into the on-disk layout.
    ///
    /// Returns the encoded bytes and the length of the header part.
    pub fn encode(&self) -> (Vec<u8>, usize) {
        let mut buf = BytesMut::with_capacity(
            MAX_LOG_RECORD_HEADER_SIZE + self.key.len() + self.value.len(),
        );

        // CRC placeholder, patched once the rest is known
        buf.put_u32_le(0);
        buf.put_u8(self.rec_type as u8);
        encode_varint(&mut buf, self.key.len() as i64);
        encode_varint(&mut buf, self.value.len() as i64);
        let header_size = buf.len();

        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

        (buf.to_vec(), header_size)
    }
}

/// Parsed record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
    pub crc: u32,
    pub rec_type: u8,
    pub key_size: u32,
    pub value_size: u32,
}

/// A record read back from a segment, with its total encoded length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadLogRecord {
    pub record: LogRecord,
    pub size: usize,
}

/// Location of a record: the index value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogRecordPos {
    pub file_id: u32,
    pub offset: u64,
    /// Full encoded length of the record
    pub size: u32,
}

impl LogRecordPos {
    pub fn new(file_id: u32, offset: u64, size: u32) -> Self {
        Self {
            file_id,
            offset,
            size,
        }
    }

    /// Compact varint form used as the value of hint records
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(MAX_VARINT_LEN32 * 2 + 10);
        encode_uvarint(&mut buf, self.file_id as u64);
        encode_uvarint(&mut buf, self.offset);
        encode_uvarint(&mut buf, self.size as u64);
        buf.to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let bad = || CaskError::CorruptRecord("malformed record position".to_string());

        let (file_id, n1) = decode_uvarint(buf).ok_or_else(bad)?;
        let (offset, n2) = decode_uvarint(&buf[n1..]).ok_or_else(bad)?;
        let (size, _) = decode_uvarint(&buf[n1 + n2..]).ok_or_else(bad)?;

        Ok(Self {
            file_id: u32::try_from(file_id).map_err(|_| bad())?,
            offset,
            size: u32::try_from(size).map_err(|_| bad())?,
        })
    }
}

/// Decode a record header from the front of `buf`.
///
/// - `Ok(None)`: no record here (short buffer, cut-off varint, or a zeroed,
///   never-written tail)
/// - `Err(CorruptRecord)`: the sizes can not belong to any record
pub fn decode_log_record_header(buf: &[u8]) -> Result<Option<(LogRecordHeader, usize)>> {
    if buf.len() <= CRC_SIZE {
        return Ok(None);
    }

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let rec_type = buf[CRC_SIZE];
    let mut index = CRC_SIZE + 1;

    let Some((key_size, n)) = decode_varint(&buf[index..]) else {
        return Ok(None);
    };
    index += n;

    let Some((value_size, n)) = decode_varint(&buf[index..]) else {
        return Ok(None);
    };
    index += n;

    if crc == 0 && key_size == 0 && value_size == 0 {
        return Ok(None);
    }

    let to_u32 = |size: i64| {
        u32::try_from(size)
            .map_err(|_| CaskError::CorruptRecord(format!("invalid size field {}", size)))
    };

    let header = LogRecordHeader {
        crc,
        rec_type,
        key_size: to_u32(key_size)?,
        value_size: to_u32(value_size)?,
    };
    Ok(Some((header, index)))
}

/// CRC over the header bytes following the CRC field, then key and value
pub fn log_record_crc(header_tail: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_tail);
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}

/// Decode one complete record from the front of `buf`.
///
/// Returns the record and the number of bytes it occupied.
pub fn decode_log_record(buf: &[u8]) -> Result<(LogRecord, usize)> {
    let (header, header_size) = decode_log_record_header(buf)?.ok_or(CaskError::EndOfSegment)?;

    let key_end = header_size + header.key_size as usize;
    let total = key_end + header.value_size as usize;
    if total > buf.len() {
        return Err(CaskError::CorruptRecord(format!(
            "record claims {} bytes, buffer holds {}",
            total,
            buf.len()
        )));
    }

    let key = &buf[header_size..key_end];
    let value = &buf[key_end..total];
    verify_crc(&header, &buf[CRC_SIZE..header_size], key, value)?;

    let rec_type = LogRecordType::from_u8(header.rec_type).ok_or_else(|| {
        CaskError::CorruptRecord(format!("unknown record type {}", header.rec_type))
    })?;

    Ok((
        LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            rec_type,
        },
        total,
    ))
}

pub(crate) fn verify_crc(
    header: &LogRecordHeader,
    header_tail: &[u8],
    key: &[u8],
    value: &[u8],
) -> Result<()> {
    let crc = log_record_crc(header_tail, key, value);
    if crc != header.crc {
        return Err(CaskError::CorruptRecord(format!(
            "crc mismatch: stored {:#010x}, computed {:#010x}",
            header.crc, crc
        )));
    }
    Ok(())
}
