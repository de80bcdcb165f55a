//! Data Module
//!
//! The durable representation: the record codec and the segment files that
//! hold encoded records.
//!
//! ## Segment Layout
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Record 1                                     │
//! │ ┌─────────┬──────────┬──────┬──────┬───────┐ │
//! │ │ CRC (4) │ Type (1) │ KLen │ VLen │ K | V │ │
//! │ └─────────┴──────────┴──────┴──────┴───────┘ │
//! ├──────────────────────────────────────────────┤
//! │ Record 2 ...                                 │
//! └──────────────────────────────────────────────┘
//! ```
//! The hint file, merge marker and seq-no file reuse the same framing.

mod data_file;
mod log_record;
mod varint;

pub use data_file::{
    data_file_path, parse_data_file_id, DataFile, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME,
    MERGE_FINISHED_FILE_NAME, RESERVED_FILE_ID, SEQ_NO_FILE_NAME,
};
pub use log_record::{
    decode_log_record, decode_log_record_header, log_record_crc, LogRecord, LogRecordHeader,
    LogRecordPos, LogRecordType, ReadLogRecord, CRC_SIZE, MAX_LOG_RECORD_HEADER_SIZE,
};
pub use varint::{
    decode_uvarint, decode_varint, encode_uvarint, encode_varint, MAX_VARINT_LEN32, MAX_VARINT_LEN64,
};
