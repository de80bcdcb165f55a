//! File IO Module
//!
//! Uniform read/write/sync/size/close contract over a single file.
//!
//! ## Backends
//! - [`FileIo`]: standard file handle opened for read + append. Used for the
//!   active segment and every auxiliary file (hint, marker, seq-no).
//! - [`MMapIo`]: read-only memory map. Only ever used for immutable segments.
//!
//! Reads are positional (`offset` argument) so concurrent readers never share
//! a cursor.

mod file_io;
mod mmap;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{CaskError, Result};

pub use file_io::FileIo;
pub use mmap::MMapIo;

/// Permission bits for newly created data files (unix only)
pub const DATA_FILE_PERM: u32 = 0o644;

/// Abstract IO over one file
pub trait IoManager: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`.
    /// Returns fewer bytes only when the end of file is reached.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Append `buf` to the end of the file
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Flush to stable storage
    fn sync(&self) -> Result<()>;

    /// Release the backend; further calls are not expected
    fn close(&self) -> Result<()>;

    /// Current file size in bytes
    fn size(&self) -> Result<u64>;

    /// Cut the file down to `len` bytes
    fn truncate(&self, len: u64) -> Result<()>;
}

/// IO backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Standard buffered file IO
    StandardFio,

    /// Memory-mapped, read-only
    MemoryMap,
}

impl TryFrom<u8> for IoType {
    type Error = CaskError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(IoType::StandardFio),
            1 => Ok(IoType::MemoryMap),
            other => Err(CaskError::UnsupportedBackend(format!("io type tag {}", other))),
        }
    }
}

impl FromStr for IoType {
    type Err = CaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "std" | "standard" | "file" => Ok(IoType::StandardFio),
            "mmap" | "memory-map" => Ok(IoType::MemoryMap),
            other => Err(CaskError::UnsupportedBackend(format!("io type '{}'", other))),
        }
    }
}

impl fmt::Display for IoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoType::StandardFio => write!(f, "standard"),
            IoType::MemoryMap => write!(f, "mmap"),
        }
    }
}

/// Open `path` with the requested backend, creating the file if missing
pub fn new_io_manager(path: &Path, io_type: IoType) -> Result<Box<dyn IoManager>> {
    match io_type {
        IoType::StandardFio => Ok(Box::new(FileIo::open(path)?)),
        IoType::MemoryMap => Ok(Box::new(MMapIo::open(path)?)),
    }
}
