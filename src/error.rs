//! Error types for caskdb
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for caskdb operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short write: expected {expected} bytes, wrote {written}")]
    ShortWrite { expected: usize, written: usize },

    #[error("unsupported backend: {0}")]
    UnsupportedBackend(String),

    // -------------------------------------------------------------------------
    // Record / Segment Errors
    // -------------------------------------------------------------------------
    #[error("corrupt log record: {0}")]
    CorruptRecord(String),

    /// Not a failure: the segment holds no further records at this offset.
    #[error("end of segment")]
    EndOfSegment,

    #[error("data file {0} not found")]
    DataFileNotFound(u32),

    #[error("data directory corrupted: {0}")]
    DirectoryCorrupted(String),

    // -------------------------------------------------------------------------
    // Key / Index Errors
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    #[error("Key is empty")]
    KeyIsEmpty,

    #[error("index backend error: {0}")]
    IndexBackend(#[from] heed::Error),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Batch / Merge Errors
    // -------------------------------------------------------------------------
    #[error("write batch exceeds the maximum of {0} pending operations")]
    ExceedMaxBatchNum(usize),

    #[error("write batch unavailable: sequence number file is missing")]
    BatchUnavailable,

    #[error("merge is already in progress")]
    MergeInProgress,

    #[error("reclaimable ratio {ratio:.3} is below the merge threshold {threshold:.3}")]
    MergeRatioUnreached { ratio: f32, threshold: f32 },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for CaskError {
    fn from(err: bincode::Error) -> Self {
        CaskError::Serialization(err.to_string())
    }
}
